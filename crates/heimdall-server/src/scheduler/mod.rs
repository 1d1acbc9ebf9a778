//! Background schedulers (§4.6): five cooperative loops that wake at a
//! fixed wall-clock offset, each crash-resilient — a panic-free error
//! from one pass is caught and logged, never propagated to the caller,
//! matching the spec's "every loop catches and logs all exceptions
//! without terminating the task."

pub mod holiday_sync;
pub mod quest;
pub mod retention;
pub mod tan_schedule;
pub mod usage_reward;
pub mod wake;

use tokio_util::sync::CancellationToken;

use crate::AppState;

/// Spawns all five scheduler tasks, returning their join handles so the
/// caller can await them during shutdown. Each task holds its own
/// clone of `state` and `stop`; cancelling `stop` unblocks every loop
/// within one sleep interval.
pub fn spawn_all(state: AppState, stop: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        tokio::spawn(quest_loop(state.clone(), stop.clone())),
        tokio::spawn(usage_reward_loop(state.clone(), stop.clone())),
        tokio::spawn(tan_schedule_loop(state.clone(), stop.clone())),
        tokio::spawn(holiday_sync_loop(state.clone(), stop.clone())),
        tokio::spawn(retention_loop(state, stop)),
    ]
}

async fn sleep_until_or_stop(duration: std::time::Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = stop.cancelled() => false,
    }
}

async fn quest_loop(state: AppState, stop: CancellationToken) {
    loop {
        let wait = wake::duration_until(chrono::Utc::now(), quest::WAKE_TIME);
        if !sleep_until_or_stop(wait, &stop).await {
            return;
        }
        match quest::run_once(&state.storage).await {
            Ok(created) => tracing::info!(created, "quest scheduler pass complete"),
            Err(err) => tracing::error!(err = %err, "quest scheduler pass failed"),
        }
    }
}

async fn usage_reward_loop(state: AppState, stop: CancellationToken) {
    loop {
        let wait = wake::duration_until(chrono::Utc::now(), usage_reward::WAKE_TIME);
        if !sleep_until_or_stop(wait, &stop).await {
            return;
        }
        match usage_reward::run_once(&state.storage).await {
            Ok(rewarded) => tracing::info!(rewarded, "usage-reward scheduler pass complete"),
            Err(err) => tracing::error!(err = %err, "usage-reward scheduler pass failed"),
        }
    }
}

async fn tan_schedule_loop(state: AppState, stop: CancellationToken) {
    loop {
        let wait = wake::duration_until(chrono::Utc::now(), tan_schedule::WAKE_TIME);
        if !sleep_until_or_stop(wait, &stop).await {
            return;
        }
        match tan_schedule::run_once(&state.storage, &state.registry).await {
            Ok(created) => tracing::info!(created, "TAN scheduler pass complete"),
            Err(err) => tracing::error!(err = %err, "TAN scheduler pass failed"),
        }
    }
}

async fn holiday_sync_loop(state: AppState, stop: CancellationToken) {
    match holiday_sync::run_startup(&state.storage, &state.config).await {
        Ok(inserted) => tracing::info!(inserted, "holiday sync (startup) complete"),
        Err(err) => tracing::error!(err = %err, "holiday sync (startup) failed"),
    }

    loop {
        let wait = wake::duration_until_yearly(
            chrono::Utc::now(),
            holiday_sync::YEARLY_MONTH,
            holiday_sync::YEARLY_DAY,
            holiday_sync::YEARLY_WAKE_TIME,
        );
        if !sleep_until_or_stop(wait, &stop).await {
            return;
        }
        use chrono::Datelike;
        let year = chrono::Utc::now().date_naive().year();
        match holiday_sync::run_for_year(&state.storage, &state.config, year).await {
            Ok(inserted) => tracing::info!(inserted, year, "holiday sync (yearly) complete"),
            Err(err) => tracing::error!(err = %err, "holiday sync (yearly) failed"),
        }
    }
}

async fn retention_loop(state: AppState, stop: CancellationToken) {
    loop {
        let wait = wake::duration_until(chrono::Utc::now(), retention::WAKE_TIME);
        if !sleep_until_or_stop(wait, &stop).await {
            return;
        }
        match retention::run_once(&state.storage).await {
            Ok(counts) => tracing::info!(
                usage_events = counts.usage_events,
                terminal_tans = counts.terminal_tans,
                usage_reward_logs = counts.usage_reward_logs,
                tan_schedule_logs = counts.tan_schedule_logs,
                "retention sweep complete"
            ),
            Err(err) => tracing::error!(err = %err, "retention sweep failed"),
        }
    }
}
