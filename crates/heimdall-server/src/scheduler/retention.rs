//! Retention sweep (§4.6, spec-given wake time 03:00 UTC). Supplements
//! the spec's two named deletions with the idempotency-ledger tables
//! that would otherwise grow unboundedly (SPEC_FULL §4.6 expansion).

use chrono::{NaiveTime, Utc};

use crate::storage::Storage;

pub const WAKE_TIME: NaiveTime = NaiveTime::from_hms_opt(3, 0, 0).unwrap();

const USAGE_EVENT_RETENTION_DAYS: i64 = 90;
const TERMINAL_TAN_RETENTION_DAYS: i64 = 30;
const LEDGER_RETENTION_DAYS: i64 = 90;

pub struct SweepCounts {
    pub usage_events: u64,
    pub terminal_tans: u64,
    pub usage_reward_logs: u64,
    pub tan_schedule_logs: u64,
}

pub async fn run_once(storage: &Storage) -> anyhow::Result<SweepCounts> {
    let now = Utc::now();

    let usage_events = storage
        .prune_usage_events_older_than(now - chrono::Duration::days(USAGE_EVENT_RETENTION_DAYS))
        .await?;
    let terminal_tans = storage
        .prune_terminal_tans_older_than(now - chrono::Duration::days(TERMINAL_TAN_RETENTION_DAYS))
        .await?;

    let ledger_cutoff = now.date_naive() - chrono::Duration::days(LEDGER_RETENTION_DAYS);
    let usage_reward_logs = storage.prune_usage_reward_logs_older_than(ledger_cutoff).await?;
    let tan_schedule_logs = storage.prune_tan_schedule_logs_older_than(ledger_cutoff).await?;

    Ok(SweepCounts {
        usage_events,
        terminal_tans,
        usage_reward_logs,
        tan_schedule_logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_runs_clean_on_empty_store() {
        let storage = Storage::new_in_memory().await.unwrap();
        let counts = run_once(&storage).await.unwrap();
        assert_eq!(counts.usage_events, 0);
        assert_eq!(counts.terminal_tans, 0);
    }
}
