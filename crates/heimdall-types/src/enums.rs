//! Closed enumerations from the data model (§3). Kept as tagged Rust
//! enums rather than strings so decision paths (redemption semantics,
//! recurrence scheduling, proof handling) pattern-match exhaustively.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Parent,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Android,
    Windows,
    Ios,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Revoked,
}

/// A classification of a calendar date that selects which time rules
/// apply. Distinct from [`DayTypeSource`], which tracks provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayType {
    Weekday,
    Weekend,
    Holiday,
    Vacation,
    Custom,
}

impl DayType {
    /// `rule.day_types` is stored as a set of free-form strings so a
    /// `TimeRule` can opt into `custom` day types a family defines
    /// ad hoc; this matches by the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DayType::Weekday => "weekday",
            DayType::Weekend => "weekend",
            DayType::Holiday => "holiday",
            DayType::Vacation => "vacation",
            DayType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayTypeSource {
    Api,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Device,
    AppGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TanType {
    Time,
    GroupUnlock,
    ExtendWindow,
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TanSource {
    Quest,
    ParentManual,
    Scheduled,
    Totp,
    UsageReward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TanStatus {
    Active,
    Redeemed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TanScheduleRecurrence {
    Daily,
    Weekdays,
    Weekends,
    SchoolDays,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestProofType {
    Photo,
    Screenshot,
    ParentConfirm,
    Auto,
    Checklist,
}

/// Distinct from [`TanScheduleRecurrence`]: quest templates additionally
/// support `once` (never auto-scheduled) but have no `weekends` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestRecurrence {
    Daily,
    Weekly,
    SchoolDays,
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestInstanceStatus {
    Available,
    Claimed,
    PendingReview,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventType {
    Start,
    Stop,
    Blocked,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageRewardTrigger {
    DailyUnder,
    StreakUnder,
    GroupFree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotpMode {
    Tan,
    Override,
    /// Either `tan` or `override` unlock is acceptable; skip the
    /// mode-mismatch check entirely (§9 open question resolution).
    Both,
}
