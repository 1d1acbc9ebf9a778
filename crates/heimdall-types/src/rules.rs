//! The output of the policy-resolution engine (§4.1), shared verbatim
//! between the server (which computes it) and the agent (which applies
//! it and caches it offline).

use crate::ids::{AppGroupId, DeviceId, TanId};
use crate::enums::{TanSource, TanType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// `"HH:MM"`, family-local.
    pub start: String,
    /// `"HH:MM"`, family-local.
    pub end: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLimit {
    pub group_id: AppGroupId,
    pub max_minutes: i64,
    /// Minutes already used today against this group's limit. Not part
    /// of the original rule row; filled in during resolution so the
    /// agent can apply `limit > 0 && used >= limit` directly (§4.12).
    #[serde(default)]
    pub used_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TanSnapshot {
    pub id: TanId,
    #[serde(rename = "type")]
    pub tan_type: TanType,
    pub value_minutes: Option<i64>,
    /// `"HH:MM"` family-local, only set for `extend_window` TANs.
    pub value_unlock_until: Option<String>,
    pub scope_groups: Option<Vec<AppGroupId>>,
    pub scope_devices: Option<Vec<DeviceId>>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub source: TanSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotpConfigSnapshot {
    pub enabled: bool,
    /// Base32 TOTP secret, cached so the agent can verify unlock codes
    /// locally without a server round-trip (§4.12 "TOTP unlock (local)").
    pub secret: String,
    pub mode: crate::enums::TotpMode,
    pub tan_minutes: i64,
    pub override_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRules {
    pub day_type: String,
    pub time_windows: Vec<TimeWindow>,
    pub group_limits: Vec<GroupLimit>,
    pub daily_limit_minutes: Option<i64>,
    pub remaining_minutes: Option<i64>,
    pub active_tans: Vec<TanSnapshot>,
    pub coupled_devices: Vec<DeviceId>,
    pub shared_budget: bool,
    pub totp_config: Option<TotpConfigSnapshot>,
    /// Lowercased executable/package name → owning app group, snapshotted
    /// fresh on every resolution. Embedded here (rather than a dedicated
    /// `app_group_map_updated` push) so the agent always has an
    /// up-to-date mapping the moment it applies a `rules_updated` frame
    /// (§9 open question 1).
    #[serde(default)]
    pub app_group_map: HashMap<String, AppGroupId>,
}

impl ResolvedRules {
    /// The record returned when the device is absent or revoked (§4.1
    /// step 1). Every other field defaults empty/false/None so callers
    /// never need to special-case "no device" beyond checking
    /// `day_type`.
    pub fn unknown() -> Self {
        Self {
            day_type: "unknown".to_string(),
            time_windows: Vec::new(),
            group_limits: Vec::new(),
            daily_limit_minutes: None,
            remaining_minutes: None,
            active_tans: Vec::new(),
            coupled_devices: Vec::new(),
            shared_budget: false,
            totp_config: None,
            app_group_map: HashMap::new(),
        }
    }
}
