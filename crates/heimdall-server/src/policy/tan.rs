//! TAN engine (§4.2): code generation, redemption validation, atomic
//! state transition. Grounded in
//! `original_source/backend/app/services/tan_service.py`.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use uuid::Uuid;

use crate::error::{HeimdallError, HeimdallResult};
use crate::policy::resolver::{family_timezone, in_blackout_window};
use crate::storage::{Storage, TanRow};

pub const MAX_TANS_PER_DAY: i64 = 3;
pub const MAX_BONUS_MINUTES_PER_DAY: i64 = 90;

const WORDS: [&str; 20] = [
    "HERO", "ODIN", "THOR", "LOKI", "FREYA", "FENRIR", "BALDUR", "SIGURD", "BRAGI", "IDUN",
    "NORNS", "AEGIR", "SKADI", "FRIGG", "VIDAR", "VALI", "MAGNI", "MODI", "NJORD", "TYR",
];

/// Draws a word + 4-digit suffix from OS entropy without pulling in the
/// `rand` crate: `uuid`'s `v4` feature already pulls `getrandom`
/// transitively, so a single `Uuid::new_v4()` per attempt supplies all
/// the randomness a code needs.
fn random_code() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let word = WORDS[(bytes[0] as usize) % WORDS.len()];
    let digits = (u16::from(bytes[1]) << 8 | u16::from(bytes[2])) % 10_000;
    format!("{word}-{digits:04}")
}

/// Generates a code guaranteed unique against the `tans` table at the
/// moment of the check, retrying on collision up to `retry_limit`
/// times before failing closed.
pub async fn generate_unique_code(storage: &Storage, retry_limit: u32) -> HeimdallResult<String> {
    for _ in 0..retry_limit {
        let code = random_code();
        if !storage.tan_code_exists(&code).await? {
            return Ok(code);
        }
    }
    Err(HeimdallError::Internal(anyhow::anyhow!(
        "exhausted {retry_limit} attempts generating a unique TAN code"
    )))
}

/// Default expiry when the caller doesn't specify one: end of the
/// current day in the family's timezone, converted to a UTC instant.
pub fn default_expiry(now: DateTime<Utc>, timezone: &str) -> DateTime<Utc> {
    let tz = family_timezone(timezone);
    let local_today = now.with_timezone(&tz).date_naive();
    let local_end = local_today.and_hms_opt(23, 59, 59).unwrap();
    tz.from_local_datetime(&local_end)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now + ChronoDuration::hours(24))
}

/// Validates redemption in the spec's exact order (first failure wins)
/// then performs the atomic `active -> redeemed` claim.
pub async fn redeem(storage: &Storage, code: &str, family_timezone_name: &str) -> HeimdallResult<TanRow> {
    let now = Utc::now();

    let tan = storage
        .get_tan_by_code(code)
        .await?
        .ok_or(HeimdallError::NotFound("tan"))?;

    if tan.status != "active" {
        return Err(HeimdallError::Conflict("tan is not active".into()));
    }
    if tan.expires_at <= now {
        return Err(HeimdallError::Conflict("tan has expired".into()));
    }

    let child_id =
        Uuid::parse_str(&tan.child_id).map_err(|e| HeimdallError::Internal(e.into()))?;
    let tz = family_timezone(family_timezone_name);
    let today = now.with_timezone(&tz).date_naive();

    let redeemed_today = storage.count_redeemed_tans_on_date(child_id, today).await?;
    if redeemed_today >= MAX_TANS_PER_DAY {
        return Err(HeimdallError::Conflict(format!(
            "daily TAN cap of {MAX_TANS_PER_DAY} already reached"
        )));
    }

    if tan.tan_type == "time" {
        let value = tan.value_minutes.unwrap_or(0);
        let already_redeemed_minutes = storage
            .sum_redeemed_time_minutes_on_date(child_id, today)
            .await?;
        if already_redeemed_minutes + value > MAX_BONUS_MINUTES_PER_DAY {
            return Err(HeimdallError::Conflict(format!(
                "daily bonus-minute cap of {MAX_BONUS_MINUTES_PER_DAY} would be exceeded"
            )));
        }

        if let Some(scope_groups) = &tan.scope_groups {
            let group_ids: Vec<Uuid> = serde_json::from_str(scope_groups).unwrap_or_default();
            for group_id in &group_ids {
                if let Some(group) = storage.get_app_group(*group_id).await? {
                    if let Some(cap) = group.max_tan_bonus_per_day {
                        let group_minutes = storage
                            .sum_redeemed_time_minutes_for_group_on_date(child_id, today, *group_id)
                            .await?;
                        if group_minutes + value > cap {
                            return Err(HeimdallError::Conflict(format!(
                                "group bonus-minute cap of {cap} would be exceeded"
                            )));
                        }
                    }
                }
            }
        }
    }

    if let Some(scope_groups) = &tan.scope_groups {
        let group_ids: Vec<Uuid> = serde_json::from_str(scope_groups).unwrap_or_default();
        for group_id in &group_ids {
            let group = storage
                .get_app_group(*group_id)
                .await?
                .ok_or(HeimdallError::NotFound("app_group"))?;
            if !group.tan_allowed {
                return Err(HeimdallError::Conflict(
                    "TAN redemption is not allowed for one of this TAN's groups".into(),
                ));
            }
        }
    }

    if in_blackout_window(now.with_timezone(&tz).time()) {
        return Err(HeimdallError::Conflict(
            "redemption is blocked during the blackout window".into(),
        ));
    }

    let tan_id = Uuid::parse_str(&tan.id).map_err(|e| HeimdallError::Internal(e.into()))?;
    if !storage.redeem_tan(tan_id, now).await? {
        return Err(HeimdallError::Conflict(
            "tan was redeemed concurrently by another request".into(),
        ));
    }

    storage
        .get_tan_by_code(code)
        .await?
        .ok_or(HeimdallError::NotFound("tan"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_code_matches_format() {
        let code = random_code();
        let (word, digits) = code.split_once('-').unwrap();
        assert!(WORDS.contains(&word));
        assert_eq!(digits.len(), 4);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn redeem_unknown_code_is_not_found() {
        let storage = Storage::new_in_memory().await.unwrap();
        let err = redeem(&storage, "HERO-0000", "UTC").await.unwrap_err();
        assert!(matches!(err, HeimdallError::NotFound("tan")));
    }
}
