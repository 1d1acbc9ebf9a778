//! Scheduled TAN generation (§4.6 "TAN scheduler"). Grounded in
//! `original_source/backend/app/services/tan_scheduler.py`.

use chrono::{Datelike, NaiveTime, Utc, Weekday};
use heimdall_types::TanScheduleRecurrence;
use uuid::Uuid;

use crate::registry::ConnectionRegistry;
use crate::storage::{Storage, TanScheduleRow};

pub const WAKE_TIME: NaiveTime = NaiveTime::from_hms_opt(0, 15, 0).unwrap();

/// One pass over every active schedule whose recurrence matches today;
/// idempotent per `(schedule_id, date)` via `TanScheduleLog`.
pub async fn run_once(storage: &Storage, registry: &ConnectionRegistry) -> anyhow::Result<usize> {
    let now = Utc::now();
    let today = now.date_naive();
    let weekday = today.weekday();
    let mut created = 0;

    for (schedule, family_id) in storage.list_active_tan_schedules_with_family().await? {
        let schedule_id = Uuid::parse_str(&schedule.id)?;
        if !matches_recurrence(&schedule, weekday, storage, family_id, today).await? {
            continue;
        }
        if storage.tan_schedule_log_exists(schedule_id, today).await? {
            continue;
        }

        let child_id = Uuid::parse_str(&schedule.child_id)?;
        let code = crate::policy::tan::generate_unique_code(storage, 10).await?;
        let expires_at = now + chrono::Duration::hours(schedule.expires_after_hours);

        let tan_id = storage
            .insert_tan(
                child_id,
                &code,
                &schedule.tan_type,
                schedule.scope_groups.as_deref(),
                schedule.scope_devices.as_deref(),
                schedule.value_minutes,
                schedule.value_unlock_until.as_deref(),
                expires_at,
                "scheduled",
                None,
                now,
            )
            .await?;

        storage.insert_tan_schedule_log(schedule_id, today, tan_id).await?;

        crate::push::notify_parent_event(
            registry,
            family_id,
            "TAN automatically created",
            &format!("{}: {}", schedule.name, code),
            heimdall_types::ws::NotificationCategory::Tan,
            Some(child_id.into()),
        );

        created += 1;
    }

    Ok(created)
}

async fn matches_recurrence(
    schedule: &TanScheduleRow,
    weekday: Weekday,
    storage: &Storage,
    family_id: Uuid,
    today: chrono::NaiveDate,
) -> anyhow::Result<bool> {
    let recurrence: TanScheduleRecurrence =
        serde_json::from_value(serde_json::Value::String(schedule.recurrence.clone()))?;
    let is_weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
    Ok(match recurrence {
        TanScheduleRecurrence::Daily => true,
        TanScheduleRecurrence::Weekdays => !is_weekend,
        TanScheduleRecurrence::Weekends => is_weekend,
        TanScheduleRecurrence::SchoolDays => {
            !is_weekend && storage.count_holiday_overrides(family_id, today).await? == 0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn daily_schedule_generates_once_per_day() {
        let storage = Storage::new_in_memory().await.unwrap();
        let registry = ConnectionRegistry::new();
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
        let schedule_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tan_schedules \
             (id, child_id, name, recurrence, tan_type, value_minutes, expires_after_hours, active, created_at) \
             VALUES (?, ?, 'Morning bonus', 'daily', 'time', 15, 6, 1, ?)",
        )
        .bind(schedule_id.to_string())
        .bind(child_id.to_string())
        .bind(now.to_rfc3339())
        .execute(storage.pool())
        .await
        .unwrap();

        let first = run_once(&storage, &registry).await.unwrap();
        assert_eq!(first, 1);
        let second = run_once(&storage, &registry).await.unwrap();
        assert_eq!(second, 0);
    }
}
