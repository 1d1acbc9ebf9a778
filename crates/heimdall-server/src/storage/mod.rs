//! Entity store: typed persistent records for every table in the data
//! model (§3), backed by SQLite in WAL mode.
//!
//! Composite/JSON-ish fields (`day_types`, `time_windows`,
//! `group_limits`, `device_ids`, `scope_groups`, `scope_devices`,
//! `reward_group_ids`, `tan_groups`) are stored as JSON text columns and
//! left as raw `String` on the row structs; callers that need the
//! structured form decode it with `serde_json` at the point of use
//! (the policy resolver and TAN engine are the only two call sites that
//! care, and each wants a slightly different shape out of the same raw
//! column).

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use uuid::Uuid;

pub mod rows;

pub use rows::*;

const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

async fn with_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, sqlx::Error> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(sqlx::Error::PoolTimedOut),
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("heimdall.db");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    /// In-memory database for tests; never persisted to disk.
    #[cfg(test)]
    pub async fn new_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let sql = include_str!("migrations/0001_init.sql");
        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            if let Err(err) = sqlx::query(statement).execute(&self.pool).await {
                let msg = err.to_string();
                if !msg.contains("duplicate column") {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- families ------------------------------------------------------------

    pub async fn get_family(&self, id: Uuid) -> Result<Option<FamilyRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, FamilyRow>("SELECT * FROM families WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn list_families(&self) -> Result<Vec<FamilyRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, FamilyRow>("SELECT * FROM families ORDER BY created_at ASC")
                .fetch_all(&self.pool),
        )
        .await
    }

    // -- users -----------------------------------------------------------------

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn list_children(&self, family_id: Uuid) -> Result<Vec<UserRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, UserRow>(
                "SELECT * FROM users WHERE family_id = ? AND role = 'child'",
            )
            .bind(family_id.to_string())
            .fetch_all(&self.pool),
        )
        .await
    }

    // -- devices -----------------------------------------------------------------

    pub async fn get_device(&self, id: Uuid) -> Result<Option<DeviceRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn get_device_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<DeviceRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE device_token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn list_devices_for_child(
        &self,
        child_id: Uuid,
    ) -> Result<Vec<DeviceRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE child_id = ?")
                .bind(child_id.to_string())
                .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn update_device_last_seen(
        &self,
        device_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        with_timeout(async {
            sqlx::query("UPDATE devices SET last_seen = ? WHERE id = ?")
                .bind(now.to_rfc3339())
                .bind(device_id.to_string())
                .execute(&self.pool)
                .await
                .map(|_| ())
        })
        .await
    }

    // -- device couplings --------------------------------------------------------

    pub async fn get_coupling_for_child(
        &self,
        child_id: Uuid,
    ) -> Result<Option<DeviceCouplingRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, DeviceCouplingRow>(
                "SELECT * FROM device_couplings WHERE child_id = ?",
            )
            .bind(child_id.to_string())
            .fetch_optional(&self.pool),
        )
        .await
    }

    // -- app groups ----------------------------------------------------------

    pub async fn get_app_group(&self, id: Uuid) -> Result<Option<AppGroupRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, AppGroupRow>("SELECT * FROM app_groups WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool),
        )
        .await
    }

    /// Every `(app_executable, group_id)` pair for a child's app groups,
    /// used to build the `app_group_map` snapshot embedded in
    /// `ResolvedRules` (§9 open question 1). Package-only rows (no
    /// executable set) are skipped — the agent's enforcement loop keys
    /// purely off executable name.
    pub async fn list_app_executables_for_child(
        &self,
        child_id: Uuid,
    ) -> Result<Vec<(String, String)>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, (String, String)>(
                "SELECT a.app_executable, g.id FROM app_group_apps a \
                 JOIN app_groups g ON g.id = a.group_id \
                 WHERE g.child_id = ? AND a.app_executable IS NOT NULL",
            )
            .bind(child_id.to_string())
            .fetch_all(&self.pool),
        )
        .await
    }

    // -- day type overrides -------------------------------------------------

    pub async fn get_day_type_override(
        &self,
        family_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<Option<DayTypeOverrideRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, DayTypeOverrideRow>(
                "SELECT * FROM day_type_overrides WHERE family_id = ? AND date = ?",
            )
            .bind(family_id.to_string())
            .bind(date.to_string())
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn count_holiday_overrides(
        &self,
        family_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = with_timeout(
            sqlx::query_as(
                "SELECT COUNT(*) FROM day_type_overrides \
                 WHERE family_id = ? AND date = ? AND day_type IN ('holiday', 'vacation')",
            )
            .bind(family_id.to_string())
            .bind(date.to_string())
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.0)
    }

    pub async fn insert_day_type_override_if_absent(
        &self,
        family_id: Uuid,
        date: chrono::NaiveDate,
        day_type: &str,
        label: Option<&str>,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = with_timeout(
            sqlx::query(
                "INSERT OR IGNORE INTO day_type_overrides \
                 (id, family_id, date, day_type, label, source, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(family_id.to_string())
            .bind(date.to_string())
            .bind(day_type)
            .bind(label)
            .bind(source)
            .bind(now.to_rfc3339())
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- time rules -----------------------------------------------------------

    pub async fn list_active_time_rules_for_child(
        &self,
        child_id: Uuid,
        today: chrono::NaiveDate,
    ) -> Result<Vec<TimeRuleRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, TimeRuleRow>(
                "SELECT * FROM time_rules WHERE child_id = ? AND active = 1 \
                 AND (valid_from IS NULL OR valid_from <= ?) \
                 AND (valid_until IS NULL OR valid_until >= ?) \
                 ORDER BY priority DESC",
            )
            .bind(child_id.to_string())
            .bind(today.to_string())
            .bind(today.to_string())
            .fetch_all(&self.pool),
        )
        .await
    }

    // -- usage events -----------------------------------------------------------

    pub async fn sum_usage_seconds_since(
        &self,
        device_ids: &[Uuid],
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        if device_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = device_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT COALESCE(SUM(duration_seconds), 0) FROM usage_events \
             WHERE device_id IN ({placeholders}) AND started_at >= ?"
        );
        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        for id in device_ids {
            query = query.bind(id.to_string());
        }
        query = query.bind(since.to_rfc3339());
        let row = with_timeout(query.fetch_one(&self.pool)).await?;
        Ok(row.0)
    }

    pub async fn sum_usage_minutes_for_child_on_date(
        &self,
        child_id: Uuid,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
        group_id: Option<Uuid>,
    ) -> Result<i64, sqlx::Error> {
        let total_seconds: i64 = if let Some(group_id) = group_id {
            let row = with_timeout(
                sqlx::query_as::<_, (i64,)>(
                    "SELECT COALESCE(SUM(duration_seconds), 0) FROM usage_events \
                     WHERE child_id = ? AND started_at >= ? AND started_at < ? AND app_group_id = ?",
                )
                .bind(child_id.to_string())
                .bind(day_start.to_rfc3339())
                .bind(day_end.to_rfc3339())
                .bind(group_id.to_string())
                .fetch_one(&self.pool),
            )
            .await?;
            row.0
        } else {
            let row = with_timeout(
                sqlx::query_as::<_, (i64,)>(
                    "SELECT COALESCE(SUM(duration_seconds), 0) FROM usage_events \
                     WHERE child_id = ? AND started_at >= ? AND started_at < ?",
                )
                .bind(child_id.to_string())
                .bind(day_start.to_rfc3339())
                .bind(day_end.to_rfc3339())
                .fetch_one(&self.pool),
            )
            .await?;
            row.0
        };
        Ok(total_seconds / 60)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_usage_event(
        &self,
        device_id: Uuid,
        child_id: Uuid,
        app_package: Option<&str>,
        app_group_id: Option<Uuid>,
        event_type: &str,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        duration_seconds: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        with_timeout(async {
            sqlx::query(
                "INSERT INTO usage_events \
                 (id, device_id, child_id, app_package, app_group_id, event_type, \
                  started_at, ended_at, duration_seconds, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(device_id.to_string())
            .bind(child_id.to_string())
            .bind(app_package)
            .bind(app_group_id.map(|g| g.to_string()))
            .bind(event_type)
            .bind(started_at.map(|t| t.to_rfc3339()))
            .bind(ended_at.map(|t| t.to_rfc3339()))
            .bind(duration_seconds)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await?;
        Ok(id)
    }

    pub async fn prune_usage_events_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = with_timeout(
            sqlx::query("DELETE FROM usage_events WHERE created_at < ?")
                .bind(cutoff.to_rfc3339())
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }

    // -- TANs -----------------------------------------------------------------

    pub async fn tan_code_exists(&self, code: &str) -> Result<bool, sqlx::Error> {
        let row: (i64,) = with_timeout(
            sqlx::query_as("SELECT COUNT(*) FROM tans WHERE code = ?")
                .bind(code)
                .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.0 > 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_tan(
        &self,
        child_id: Uuid,
        code: &str,
        tan_type: &str,
        scope_groups: Option<&str>,
        scope_devices: Option<&str>,
        value_minutes: Option<i64>,
        value_unlock_until: Option<&str>,
        expires_at: DateTime<Utc>,
        source: &str,
        source_quest_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        with_timeout(async {
            sqlx::query(
                "INSERT INTO tans \
                 (id, child_id, code, tan_type, scope_groups, scope_devices, value_minutes, \
                  value_unlock_until, expires_at, single_use, source, source_quest_id, \
                  status, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, 'active', ?)",
            )
            .bind(id.to_string())
            .bind(child_id.to_string())
            .bind(code)
            .bind(tan_type)
            .bind(scope_groups)
            .bind(scope_devices)
            .bind(value_minutes)
            .bind(value_unlock_until)
            .bind(expires_at.to_rfc3339())
            .bind(source)
            .bind(source_quest_id.map(|q| q.to_string()))
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await?;
        Ok(id)
    }

    pub async fn get_tan_by_code(&self, code: &str) -> Result<Option<TanRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, TanRow>("SELECT * FROM tans WHERE code = ?")
                .bind(code)
                .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn list_active_tans_for_child(
        &self,
        child_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<TanRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, TanRow>(
                "SELECT * FROM tans WHERE child_id = ? AND status = 'active' AND expires_at > ?",
            )
            .bind(child_id.to_string())
            .bind(now.to_rfc3339())
            .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn count_redeemed_tans_on_date(
        &self,
        child_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = with_timeout(
            sqlx::query_as(
                "SELECT COUNT(*) FROM tans \
                 WHERE child_id = ? AND status = 'redeemed' AND substr(redeemed_at, 1, 10) = ?",
            )
            .bind(child_id.to_string())
            .bind(date.to_string())
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.0)
    }

    pub async fn sum_redeemed_time_minutes_on_date(
        &self,
        child_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = with_timeout(
            sqlx::query_as(
                "SELECT COALESCE(SUM(value_minutes), 0) FROM tans \
                 WHERE child_id = ? AND status = 'redeemed' AND tan_type = 'time' \
                 AND substr(redeemed_at, 1, 10) = ?",
            )
            .bind(child_id.to_string())
            .bind(date.to_string())
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.0)
    }

    /// Sum redeemed time-TAN minutes today that are scoped to a
    /// specific group, for `max_tan_bonus_per_day` enforcement
    /// (SPEC_FULL §4.2 expansion).
    pub async fn sum_redeemed_time_minutes_for_group_on_date(
        &self,
        child_id: Uuid,
        date: chrono::NaiveDate,
        group_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = with_timeout(
            sqlx::query_as(
                "SELECT COALESCE(SUM(value_minutes), 0) FROM tans \
                 WHERE child_id = ? AND status = 'redeemed' AND tan_type = 'time' \
                 AND substr(redeemed_at, 1, 10) = ? \
                 AND scope_groups LIKE '%' || ? || '%'",
            )
            .bind(child_id.to_string())
            .bind(date.to_string())
            .bind(group_id.to_string())
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.0)
    }

    /// Atomic `active -> redeemed` transition. Returns `true` iff this
    /// call performed the transition (the conditional `WHERE status =
    /// 'active'` means a concurrent double-redemption loses the race
    /// without any explicit locking), following the claim-style update
    /// pattern used elsewhere in this workspace for idempotent state
    /// machines.
    pub async fn redeem_tan(&self, tan_id: Uuid, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
        let result = with_timeout(
            sqlx::query(
                "UPDATE tans SET status = 'redeemed', redeemed_at = ? \
                 WHERE id = ? AND status = 'active'",
            )
            .bind(now.to_rfc3339())
            .bind(tan_id.to_string())
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn expire_tan(&self, tan_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = with_timeout(
            sqlx::query("UPDATE tans SET status = 'expired' WHERE id = ? AND status = 'active'")
                .bind(tan_id.to_string())
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn prune_terminal_tans_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = with_timeout(
            sqlx::query(
                "DELETE FROM tans WHERE status IN ('redeemed', 'expired') AND created_at < ?",
            )
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }

    // -- TAN schedules ----------------------------------------------------------

    /// Active schedules join resolves each schedule's family through
    /// its child's `family_id` so the TAN scheduler (§4.6) can group
    /// work per family without a second round trip per schedule.
    pub async fn list_active_tan_schedules_with_family(
        &self,
    ) -> Result<Vec<(TanScheduleRow, Uuid)>, sqlx::Error> {
        let schedules: Vec<TanScheduleRow> = with_timeout(
            sqlx::query_as::<_, TanScheduleRow>("SELECT * FROM tan_schedules WHERE active = 1")
                .fetch_all(&self.pool),
        )
        .await?;

        let mut out = Vec::with_capacity(schedules.len());
        for schedule in schedules {
            let child_id = Uuid::parse_str(&schedule.child_id)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            let user = self
                .get_user(child_id)
                .await?
                .ok_or_else(|| sqlx::Error::RowNotFound)?;
            let family_id = Uuid::parse_str(&user.family_id)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            out.push((schedule, family_id));
        }
        Ok(out)
    }

    pub async fn tan_schedule_log_exists(
        &self,
        schedule_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<bool, sqlx::Error> {
        let row: (i64,) = with_timeout(
            sqlx::query_as(
                "SELECT COUNT(*) FROM tan_schedule_logs \
                 WHERE schedule_id = ? AND generated_date = ?",
            )
            .bind(schedule_id.to_string())
            .bind(date.to_string())
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.0 > 0)
    }

    pub async fn insert_tan_schedule_log(
        &self,
        schedule_id: Uuid,
        date: chrono::NaiveDate,
        generated_tan_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        with_timeout(async {
            sqlx::query(
                "INSERT INTO tan_schedule_logs \
                 (id, schedule_id, generated_date, generated_tan_id) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(schedule_id.to_string())
            .bind(date.to_string())
            .bind(generated_tan_id.to_string())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    // -- quest templates / instances ---------------------------------------------

    pub async fn list_recurring_quest_templates(
        &self,
        family_id: Uuid,
    ) -> Result<Vec<QuestTemplateRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, QuestTemplateRow>(
                "SELECT * FROM quest_templates WHERE family_id = ? AND active = 1 \
                 AND recurrence IN ('daily', 'weekly', 'school_days')",
            )
            .bind(family_id.to_string())
            .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn quest_instance_exists_since(
        &self,
        template_id: Uuid,
        child_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let row: (i64,) = with_timeout(
            sqlx::query_as(
                "SELECT COUNT(*) FROM quest_instances \
                 WHERE template_id = ? AND child_id = ? AND created_at >= ?",
            )
            .bind(template_id.to_string())
            .bind(child_id.to_string())
            .bind(since.to_rfc3339())
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.0 > 0)
    }

    pub async fn insert_quest_instance(
        &self,
        template_id: Uuid,
        child_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        with_timeout(async {
            sqlx::query(
                "INSERT INTO quest_instances (id, template_id, child_id, status, created_at) \
                 VALUES (?, ?, ?, 'available', ?)",
            )
            .bind(id.to_string())
            .bind(template_id.to_string())
            .bind(child_id.to_string())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await?;
        Ok(id)
    }

    // -- usage reward rules / logs ------------------------------------------------

    pub async fn list_active_usage_reward_rules(
        &self,
    ) -> Result<Vec<UsageRewardRuleRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, UsageRewardRuleRow>(
                "SELECT * FROM usage_reward_rules WHERE active = 1",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn get_usage_reward_log(
        &self,
        rule_id: Uuid,
        date: chrono::NaiveDate,
    ) -> Result<Option<UsageRewardLogRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, UsageRewardLogRow>(
                "SELECT * FROM usage_reward_logs WHERE rule_id = ? AND evaluated_date = ?",
            )
            .bind(rule_id.to_string())
            .bind(date.to_string())
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn list_usage_reward_logs_in_range(
        &self,
        rule_id: Uuid,
        from: chrono::NaiveDate,
        to_exclusive: chrono::NaiveDate,
    ) -> Result<Vec<UsageRewardLogRow>, sqlx::Error> {
        with_timeout(
            sqlx::query_as::<_, UsageRewardLogRow>(
                "SELECT * FROM usage_reward_logs \
                 WHERE rule_id = ? AND evaluated_date >= ? AND evaluated_date < ? \
                 ORDER BY evaluated_date DESC",
            )
            .bind(rule_id.to_string())
            .bind(from.to_string())
            .bind(to_exclusive.to_string())
            .fetch_all(&self.pool),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_usage_reward_log(
        &self,
        rule_id: Uuid,
        child_id: Uuid,
        date: chrono::NaiveDate,
        usage_minutes: i64,
        threshold_minutes: i64,
        rewarded: bool,
        generated_tan_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error> {
        with_timeout(async {
            sqlx::query(
                "INSERT INTO usage_reward_logs \
                 (id, rule_id, child_id, evaluated_date, usage_minutes, threshold_minutes, \
                  rewarded, generated_tan_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(rule_id.to_string())
            .bind(child_id.to_string())
            .bind(date.to_string())
            .bind(usage_minutes)
            .bind(threshold_minutes)
            .bind(rewarded as i64)
            .bind(generated_tan_id.map(|t| t.to_string()))
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    pub async fn prune_usage_reward_logs_older_than(
        &self,
        cutoff: chrono::NaiveDate,
    ) -> Result<u64, sqlx::Error> {
        let result = with_timeout(
            sqlx::query("DELETE FROM usage_reward_logs WHERE evaluated_date < ?")
                .bind(cutoff.to_string())
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn prune_tan_schedule_logs_older_than(
        &self,
        cutoff: chrono::NaiveDate,
    ) -> Result<u64, sqlx::Error> {
        let result = with_timeout(
            sqlx::query("DELETE FROM tan_schedule_logs WHERE generated_date < ?")
                .bind(cutoff.to_string())
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let storage = Storage::new_in_memory().await.unwrap();
        storage.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn tan_redeem_is_atomic_claim() {
        let storage = Storage::new_in_memory().await.unwrap();
        let now = Utc::now();
        let family_id = Uuid::new_v4();
        sqlx::query("INSERT INTO families (id, name, timezone, created_at) VALUES (?, 'F', 'UTC', ?)")
            .bind(family_id.to_string())
            .bind(now.to_rfc3339())
            .execute(storage.pool())
            .await
            .unwrap();
        let child_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO users (id, family_id, role, name, created_at) VALUES (?, ?, 'child', 'C', ?)",
        )
        .bind(child_id.to_string())
        .bind(family_id.to_string())
        .bind(now.to_rfc3339())
        .execute(storage.pool())
        .await
        .unwrap();

        let tan_id = storage
            .insert_tan(
                child_id,
                "HERO-1234",
                "time",
                None,
                None,
                Some(20),
                None,
                now + chrono::Duration::hours(6),
                "parent_manual",
                None,
                now,
            )
            .await
            .unwrap();

        assert!(storage.redeem_tan(tan_id, now).await.unwrap());
        assert!(!storage.redeem_tan(tan_id, now).await.unwrap());
    }
}
