//! Policy-resolution engine (§4.1). Pure function of `(device_id, now)`
//! fronted by a short-TTL cache; grounded in
//! `original_source/backend/app/services/rule_engine.py`.

use std::str::FromStr;

use chrono::{Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use heimdall_types::{GroupLimit, ResolvedRules, TanSnapshot, TimeWindow, TotpConfigSnapshot};
use uuid::Uuid;

use crate::error::{HeimdallError, HeimdallResult};
use crate::policy::cache::RulesCache;
use crate::storage::Storage;

/// Resolve `device_id`'s current policy. `bypass_cache` is set by the
/// rule-push orchestrator on every mutation; a normal poll leaves it
/// false and may be served straight from the 30 s memo.
pub async fn resolve_rules(
    storage: &Storage,
    cache: &RulesCache,
    device_id: Uuid,
    bypass_cache: bool,
) -> HeimdallResult<ResolvedRules> {
    if !bypass_cache {
        if let Some(cached) = cache.get(device_id) {
            return Ok(cached);
        }
    }

    let Some(device) = storage.get_device(device_id).await? else {
        return Ok(ResolvedRules::unknown());
    };
    if device.status != "active" {
        return Ok(ResolvedRules::unknown());
    }

    let child_id = Uuid::parse_str(&device.child_id).map_err(|e| HeimdallError::Internal(e.into()))?;
    let Some(child) = storage.get_user(child_id).await? else {
        return Ok(ResolvedRules::unknown());
    };
    let family_id = Uuid::parse_str(&child.family_id).map_err(|e| HeimdallError::Internal(e.into()))?;
    let Some(family) = storage.get_family(family_id).await? else {
        return Ok(ResolvedRules::unknown());
    };
    let tz: Tz = Tz::from_str(&family.timezone).unwrap_or(Tz::UTC);

    let now_utc = Utc::now();
    let now_local = now_utc.with_timezone(&tz);
    let today = now_local.date_naive();

    let day_type = resolve_day_type(storage, family_id, today, now_local.weekday()).await?;

    let rules = storage
        .list_active_time_rules_for_child(child_id, today)
        .await?;

    let mut time_windows: Vec<TimeWindow> = Vec::new();
    let mut group_limit_raws: Vec<(Uuid, i64)> = Vec::new();
    let mut daily_limit_minutes: Option<i64> = None;

    for rule in &rules {
        let day_types: Vec<String> = serde_json::from_str(&rule.day_types).unwrap_or_default();
        if !day_types.iter().any(|d| d == &day_type) {
            continue;
        }

        let windows: Vec<TimeWindow> = serde_json::from_str(&rule.time_windows).unwrap_or_default();
        time_windows.extend(windows);

        #[derive(serde::Deserialize)]
        struct RawGroupLimit {
            group_id: Uuid,
            max_minutes: i64,
        }
        let limits: Vec<RawGroupLimit> =
            serde_json::from_str(&rule.group_limits).unwrap_or_default();
        group_limit_raws.extend(limits.into_iter().map(|l| (l.group_id, l.max_minutes)));

        if let Some(limit) = rule.daily_limit_minutes {
            daily_limit_minutes = Some(match daily_limit_minutes {
                Some(existing) => existing.min(limit),
                None => limit,
            });
        }
    }

    let day_start_local = tz
        .from_local_datetime(&today.and_hms_opt(0, 0, 0).unwrap())
        .single()
        .unwrap_or(now_local);
    let day_start_utc = day_start_local.with_timezone(&Utc);
    let day_end_utc = day_start_utc + ChronoDuration::days(1);

    let coupling = storage.get_coupling_for_child(child_id).await?;
    let (coupled_devices, shared_budget) = match &coupling {
        Some(c) => {
            let ids: Vec<Uuid> = serde_json::from_str(&c.device_ids).unwrap_or_default();
            (ids, c.shared_budget)
        }
        None => (Vec::new(), false),
    };

    let remaining_minutes = if let Some(limit) = daily_limit_minutes {
        let devices_to_count: Vec<Uuid> = if shared_budget && !coupled_devices.is_empty() {
            coupled_devices.clone()
        } else {
            vec![device_id]
        };
        let used_seconds = storage
            .sum_usage_seconds_since(&devices_to_count, day_start_utc)
            .await?;
        Some((limit - used_seconds / 60).max(0))
    } else {
        None
    };

    let mut group_limits = Vec::with_capacity(group_limit_raws.len());
    for (group_id, max_minutes) in group_limit_raws {
        let used_minutes = storage
            .sum_usage_minutes_for_child_on_date(child_id, day_start_utc, day_end_utc, Some(group_id))
            .await?;
        group_limits.push(GroupLimit {
            group_id: group_id.into(),
            max_minutes,
            used_minutes,
        });
    }

    let active_tan_rows = storage.list_active_tans_for_child(child_id, now_utc).await?;
    let mut active_tans = Vec::with_capacity(active_tan_rows.len());
    for tan in active_tan_rows {
        active_tans.push(TanSnapshot {
            id: Uuid::parse_str(&tan.id).map_err(|e| HeimdallError::Internal(e.into()))?.into(),
            tan_type: parse_enum(&tan.tan_type)?,
            value_minutes: tan.value_minutes,
            value_unlock_until: tan.value_unlock_until,
            scope_groups: tan
                .scope_groups
                .as_deref()
                .map(|s| serde_json::from_str(s).unwrap_or_default()),
            scope_devices: tan
                .scope_devices
                .as_deref()
                .map(|s| serde_json::from_str(s).unwrap_or_default()),
            expires_at: tan.expires_at,
            source: parse_enum(&tan.source)?,
        });
    }

    let totp_config = if child.totp_enabled {
        Some(TotpConfigSnapshot {
            enabled: true,
            secret: child.totp_secret.clone().unwrap_or_default(),
            mode: parse_enum(&child.totp_mode)?,
            tan_minutes: child.totp_tan_minutes,
            override_minutes: child.totp_override_minutes,
        })
    } else {
        None
    };

    let mut app_group_map = std::collections::HashMap::new();
    for (executable, group_id) in storage.list_app_executables_for_child(child_id).await? {
        let group_id = Uuid::parse_str(&group_id).map_err(|e| HeimdallError::Internal(e.into()))?;
        app_group_map.insert(executable.to_lowercase(), group_id.into());
    }

    let resolved = ResolvedRules {
        day_type,
        time_windows,
        group_limits,
        daily_limit_minutes,
        remaining_minutes,
        active_tans,
        coupled_devices: coupled_devices.into_iter().map(Into::into).collect(),
        shared_budget,
        totp_config,
        app_group_map,
    };

    cache.put(device_id, resolved.clone());
    Ok(resolved)
}

async fn resolve_day_type(
    storage: &Storage,
    family_id: Uuid,
    today: chrono::NaiveDate,
    weekday: Weekday,
) -> HeimdallResult<String> {
    if let Some(over) = storage.get_day_type_override(family_id, today).await? {
        return Ok(over.day_type);
    }
    Ok(if matches!(weekday, Weekday::Sat | Weekday::Sun) {
        "weekend".to_string()
    } else {
        "weekday".to_string()
    })
}

fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str) -> HeimdallResult<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| HeimdallError::Internal(e.into()))
}

/// The blackout window `[21:00, 06:00)` wraps midnight; shared with the
/// TAN engine since both need "is this family-local instant inside the
/// blackout".
pub fn in_blackout_window(local_time: NaiveTime) -> bool {
    let start = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
    let end = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
    local_time >= start || local_time < end
}

pub fn family_timezone(timezone: &str) -> Tz {
    Tz::from_str(timezone).unwrap_or(Tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blackout_window_wraps_midnight() {
        assert!(in_blackout_window(NaiveTime::from_hms_opt(21, 0, 0).unwrap()));
        assert!(in_blackout_window(NaiveTime::from_hms_opt(23, 59, 59).unwrap()));
        assert!(in_blackout_window(NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        assert!(in_blackout_window(NaiveTime::from_hms_opt(5, 59, 59).unwrap()));
        assert!(!in_blackout_window(NaiveTime::from_hms_opt(6, 0, 0).unwrap()));
        assert!(!in_blackout_window(NaiveTime::from_hms_opt(20, 59, 59).unwrap()));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(family_timezone("not/a/real/zone"), Tz::UTC);
    }
}
