//! Wall-clock wake scheduling shared by every background loop (§4.6).
//!
//! The reference daemon's `tasks::jobs` loops wake on a plain fixed
//! interval (`tokio::time::interval`); nothing in that codebase needs
//! to land on a specific time-of-day, so this helper has no direct
//! teacher analogue and is new code grounded in the spec's own "fires
//! at HH:MM UTC" requirement (SPEC_FULL §4.6).

use chrono::{Datelike, NaiveTime, Utc};
use std::time::Duration;

/// Duration from `now` until the next occurrence of `target` UTC
/// time-of-day, today if still ahead, otherwise tomorrow. Never
/// returns zero — a `target` equal to `now` waits a full day rather
/// than busy-looping.
pub fn duration_until(now: chrono::DateTime<Utc>, target: NaiveTime) -> Duration {
    let today_target = now.date_naive().and_time(target).and_utc();
    let next = if today_target > now {
        today_target
    } else {
        today_target + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(1))
}

/// Duration from `now` until the next `01-02` (January 2nd) at
/// `target` UTC time-of-day, this year if still ahead, else next year.
pub fn duration_until_yearly(now: chrono::DateTime<Utc>, month: u32, day: u32, target: NaiveTime) -> Duration {
    let this_year = now.date_naive().year();
    let candidate = chrono::NaiveDate::from_ymd_opt(this_year, month, day)
        .unwrap()
        .and_time(target)
        .and_utc();
    let next = if candidate > now {
        candidate
    } else {
        chrono::NaiveDate::from_ymd_opt(this_year + 1, month, day)
            .unwrap()
            .and_time(target)
            .and_utc()
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn duration_until_wraps_to_tomorrow_when_target_passed() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let target = NaiveTime::from_hms_opt(0, 5, 0).unwrap();
        let d = duration_until(now, target);
        assert!(d.as_secs() > 23 * 3600);
    }

    #[test]
    fn duration_until_same_day_when_target_ahead() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let target = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let d = duration_until(now, target);
        assert_eq!(d.as_secs(), 3 * 3600);
    }
}
