//! Row structs mirroring `migrations/0001_init.sql` column-for-column.
//!
//! Foreign-key and primary-key columns are decoded as plain `String`
//! (SQLite has no native UUID type and sqlx's SQLite driver doesn't
//! offer a blanket `Uuid` `Type` impl the way the Postgres driver
//! does); callers parse them with `Uuid::parse_str` at the point of
//! use. JSON-shaped columns (`settings`, `device_ids`, `day_types`,
//! `time_windows`, `group_limits`, `scope_groups`, `scope_devices`,
//! `tan_groups`, `reward_group_ids`) are likewise left as raw `String`
//! and decoded with `serde_json` by whichever call site needs the
//! structured form.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct FamilyRow {
    pub id: String,
    pub name: String,
    pub timezone: String,
    pub settings: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub family_id: String,
    pub role: String,
    pub name: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub pin_hash: Option<String>,
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub totp_mode: String,
    pub totp_tan_minutes: i64,
    pub totp_override_minutes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DeviceRow {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub device_type: String,
    pub device_identifier: String,
    pub device_token_hash: String,
    pub status: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DeviceCouplingRow {
    pub id: String,
    pub child_id: String,
    /// JSON array of device ids.
    pub device_ids: String,
    pub shared_budget: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AppGroupRow {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub category: Option<String>,
    pub risk_level: Option<String>,
    pub always_allowed: bool,
    pub tan_allowed: bool,
    pub max_tan_bonus_per_day: Option<i64>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AppGroupAppRow {
    pub id: String,
    pub group_id: String,
    pub app_name: String,
    pub app_package: Option<String>,
    pub app_executable: Option<String>,
    pub platform: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TimeRuleRow {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub target_type: String,
    pub target_id: Option<String>,
    /// JSON array of day types this rule applies to.
    pub day_types: String,
    /// JSON array of `TimeWindow`.
    pub time_windows: String,
    pub daily_limit_minutes: Option<i64>,
    /// JSON array of per-group limits.
    pub group_limits: String,
    pub priority: i64,
    pub active: bool,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DayTypeOverrideRow {
    pub id: String,
    pub family_id: String,
    pub date: String,
    pub day_type: String,
    pub label: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TanRow {
    pub id: String,
    pub child_id: String,
    pub code: String,
    pub tan_type: String,
    /// JSON array of app-group ids, when scoped.
    pub scope_groups: Option<String>,
    /// JSON array of device ids, when scoped.
    pub scope_devices: Option<String>,
    pub value_minutes: Option<i64>,
    pub value_unlock_until: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub single_use: bool,
    pub source: String,
    pub source_quest_id: Option<String>,
    pub status: String,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TanScheduleRow {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub recurrence: String,
    pub tan_type: String,
    pub value_minutes: Option<i64>,
    pub value_unlock_until: Option<String>,
    pub scope_groups: Option<String>,
    pub scope_devices: Option<String>,
    pub expires_after_hours: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TanScheduleLogRow {
    pub id: String,
    pub schedule_id: String,
    pub generated_date: String,
    pub generated_tan_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct QuestTemplateRow {
    pub id: String,
    pub family_id: String,
    pub name: String,
    pub category: Option<String>,
    pub reward_minutes: i64,
    /// JSON array of app-group ids this quest's TAN unlocks, if any.
    pub tan_groups: Option<String>,
    pub proof_type: String,
    pub ai_verify: bool,
    pub recurrence: String,
    pub auto_detect_app: Option<String>,
    pub auto_detect_minutes: Option<i64>,
    pub streak_threshold: Option<i64>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct QuestInstanceRow {
    pub id: String,
    pub template_id: String,
    pub child_id: String,
    pub status: String,
    pub claimed_at: Option<DateTime<Utc>>,
    pub proof_url: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub generated_tan_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UsageEventRow {
    pub id: String,
    pub device_id: String,
    pub child_id: String,
    pub app_package: Option<String>,
    pub app_group_id: Option<String>,
    pub event_type: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UsageRewardRuleRow {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub trigger_type: String,
    pub threshold_minutes: i64,
    pub target_group_id: Option<String>,
    pub streak_days: Option<i64>,
    pub reward_minutes: i64,
    /// JSON array of app-group ids the reward TAN unlocks.
    pub reward_group_ids: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UsageRewardLogRow {
    pub id: String,
    pub rule_id: String,
    pub child_id: String,
    pub evaluated_date: String,
    pub usage_minutes: i64,
    pub threshold_minutes: i64,
    pub rewarded: bool,
    pub generated_tan_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FamilyInvitationRow {
    pub id: String,
    pub family_id: String,
    pub code: String,
    pub role: String,
    pub created_by: String,
    pub expires_at: DateTime<Utc>,
    pub used_by: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRow {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}
