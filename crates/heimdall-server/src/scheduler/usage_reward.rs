//! Usage-reward evaluation (§4.6 "Usage-reward scheduler"). Grounded in
//! `original_source/backend/app/services/usage_reward_service.py`.

use chrono::{NaiveTime, Utc};
use heimdall_types::UsageRewardTrigger;
use uuid::Uuid;

use crate::policy::tan::default_expiry;
use crate::storage::{Storage, UsageRewardRuleRow};

pub const WAKE_TIME: NaiveTime = NaiveTime::from_hms_opt(0, 10, 0).unwrap();

/// Evaluates **yesterday** for every active rule, idempotent per
/// `(rule_id, yesterday)` via `UsageRewardLog`. Always writes a log row
/// (rewarded or not) so a rerun on the same date is a pure no-op.
pub async fn run_once(storage: &Storage) -> anyhow::Result<usize> {
    let now = Utc::now();
    let yesterday = (now.date_naive()) - chrono::Duration::days(1);
    let mut rewarded_count = 0;

    for rule in storage.list_active_usage_reward_rules().await? {
        let rule_id = Uuid::parse_str(&rule.id)?;
        if storage.get_usage_reward_log(rule_id, yesterday).await?.is_some() {
            continue;
        }

        let child_id = Uuid::parse_str(&rule.child_id)?;
        let day_start = yesterday.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = day_start + chrono::Duration::days(1);
        let target_group_id = rule
            .target_group_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()?;

        let usage_minutes = storage
            .sum_usage_minutes_for_child_on_date(child_id, day_start, day_end, target_group_id)
            .await?;

        let rewarded = evaluate_trigger(storage, &rule, rule_id, child_id, yesterday, usage_minutes).await?;

        let generated_tan_id = if rewarded {
            Some(grant_reward_tan(storage, &rule, child_id, now).await?)
        } else {
            None
        };

        storage
            .insert_usage_reward_log(
                rule_id,
                child_id,
                yesterday,
                usage_minutes,
                rule.threshold_minutes,
                rewarded,
                generated_tan_id,
            )
            .await?;

        if rewarded {
            rewarded_count += 1;
        }
    }

    Ok(rewarded_count)
}

async fn evaluate_trigger(
    storage: &Storage,
    rule: &UsageRewardRuleRow,
    rule_id: Uuid,
    _child_id: Uuid,
    yesterday: chrono::NaiveDate,
    usage_minutes: i64,
) -> anyhow::Result<bool> {
    let trigger: UsageRewardTrigger =
        serde_json::from_value(serde_json::Value::String(rule.trigger_type.clone()))?;
    Ok(match trigger {
        UsageRewardTrigger::DailyUnder => usage_minutes < rule.threshold_minutes,
        UsageRewardTrigger::GroupFree => usage_minutes == 0,
        UsageRewardTrigger::StreakUnder => {
            let streak_days = rule.streak_days.unwrap_or(2).max(2);
            if usage_minutes >= rule.threshold_minutes {
                false
            } else {
                let needed_prior = (streak_days - 1) as usize;
                let from = yesterday - chrono::Duration::days(needed_prior as i64);
                let prior_logs = storage
                    .list_usage_reward_logs_in_range(rule_id, from, yesterday)
                    .await?;
                if prior_logs.len() < needed_prior {
                    false
                } else {
                    prior_logs
                        .iter()
                        .all(|log| log.usage_minutes < log.threshold_minutes)
                }
            }
        }
    })
}

async fn grant_reward_tan(
    storage: &Storage,
    rule: &UsageRewardRuleRow,
    child_id: Uuid,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<Uuid> {
    let user = storage
        .get_user(child_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("reward rule references unknown child"))?;
    let family = storage
        .get_family(Uuid::parse_str(&user.family_id)?)
        .await?
        .ok_or_else(|| anyhow::anyhow!("child references unknown family"))?;

    let code = crate::policy::tan::generate_unique_code(storage, 10).await?;
    let scope_groups = rule.reward_group_ids.clone();
    let expires_at = default_expiry(now, &family.timezone);

    storage
        .insert_tan(
            child_id,
            &code,
            "time",
            scope_groups.as_deref(),
            None,
            Some(rule.reward_minutes),
            None,
            expires_at,
            "usage_reward",
            None,
            now,
        )
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn daily_under_rewards_when_yesterday_has_no_usage() {
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
        let rule_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO usage_reward_rules \
             (id, child_id, name, trigger_type, threshold_minutes, reward_minutes, active, created_at) \
             VALUES (?, ?, 'Quiet day', 'daily_under', 60, 15, 1, ?)",
        )
        .bind(rule_id.to_string())
        .bind(child_id.to_string())
        .bind(now.to_rfc3339())
        .execute(storage.pool())
        .await
        .unwrap();

        let rewarded = run_once(&storage).await.unwrap();
        assert_eq!(rewarded, 1);

        let again = run_once(&storage).await.unwrap();
        assert_eq!(again, 0, "same evaluated date must not reward twice");
    }
}
