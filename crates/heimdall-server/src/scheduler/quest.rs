//! Daily quest instantiation (§4.6 "Quest scheduler"). Grounded in
//! `original_source/backend/app/services/quest_scheduler.py`.

use chrono::{NaiveTime, Utc};
use heimdall_types::QuestRecurrence;
use uuid::Uuid;

use crate::storage::{QuestTemplateRow, Storage};

pub const WAKE_TIME: NaiveTime = NaiveTime::from_hms_opt(0, 5, 0).unwrap();

/// One pass over every family: for each active recurring template
/// (`daily`, `weekly`, `school_days`), create one `available`
/// instance per child **iff** none has existed since local midnight
/// today. `once` templates are never auto-scheduled (`list_recurring_
/// quest_templates` already excludes them at the storage layer).
pub async fn run_once(storage: &Storage) -> anyhow::Result<usize> {
    let now = Utc::now();
    let mut created = 0;

    for family in storage.list_families().await? {
        let family_id = Uuid::parse_str(&family.id)?;
        let day_info = day_info(storage, family_id, now).await?;

        let templates = storage.list_recurring_quest_templates(family_id).await?;
        if templates.is_empty() {
            continue;
        }
        let children = storage.list_children(family_id).await?;

        let midnight_today = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();

        for template in &templates {
            if !should_schedule(template, &day_info, now)? {
                continue;
            }
            let template_id = Uuid::parse_str(&template.id)?;
            for child in &children {
                let child_id = Uuid::parse_str(&child.id)?;
                let exists = storage
                    .quest_instance_exists_since(template_id, child_id, midnight_today)
                    .await?;
                if exists {
                    continue;
                }
                storage.insert_quest_instance(template_id, child_id, now).await?;
                created += 1;
            }
        }
    }

    Ok(created)
}

struct DayInfo {
    is_weekday: bool,
    is_holiday: bool,
}

impl DayInfo {
    fn is_school_day(&self) -> bool {
        self.is_weekday && !self.is_holiday
    }
}

async fn day_info(storage: &Storage, family_id: Uuid, now: chrono::DateTime<Utc>) -> anyhow::Result<DayInfo> {
    use chrono::{Datelike, Weekday};
    let today = now.date_naive();
    let is_weekday = !matches!(today.weekday(), Weekday::Sat | Weekday::Sun);
    let is_holiday = storage.count_holiday_overrides(family_id, today).await? > 0;
    Ok(DayInfo { is_weekday, is_holiday })
}

/// `daily` always fires; `weekly` fires when today's weekday matches
/// the template's `created_at` weekday; `school_days` fires on
/// weekdays that are not holiday/vacation overrides; anything else
/// (only `once`, since storage already filters to the three recurring
/// variants) never fires.
fn should_schedule(
    template: &QuestTemplateRow,
    day_info: &DayInfo,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<bool> {
    use chrono::Datelike;
    let recurrence: QuestRecurrence =
        serde_json::from_value(serde_json::Value::String(template.recurrence.clone()))?;
    Ok(match recurrence {
        QuestRecurrence::Daily => true,
        QuestRecurrence::Weekly => now.date_naive().weekday() == template.created_at.weekday(),
        QuestRecurrence::SchoolDays => day_info.is_school_day(),
        QuestRecurrence::Once => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn seed_family_with_child(storage: &Storage) -> (Uuid, Uuid) {
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
        (family_id, child_id)
    }

    #[tokio::test]
    async fn daily_template_creates_one_instance_per_child_then_is_idempotent() {
        let storage = Storage::new_in_memory().await.unwrap();
        let (family_id, _child_id) = seed_family_with_child(&storage).await;
        let now = Utc::now();
        let template_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO quest_templates \
             (id, family_id, name, reward_minutes, proof_type, recurrence, active, created_at) \
             VALUES (?, ?, 'Tidy room', 10, 'parent_confirm', 'daily', 1, ?)",
        )
        .bind(template_id.to_string())
        .bind(family_id.to_string())
        .bind(now.to_rfc3339())
        .execute(storage.pool())
        .await
        .unwrap();

        let first = run_once(&storage).await.unwrap();
        assert_eq!(first, 1);

        let second = run_once(&storage).await.unwrap();
        assert_eq!(second, 0, "second call same day must create nothing new");
    }
}
