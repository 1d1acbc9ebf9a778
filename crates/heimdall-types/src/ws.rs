//! WebSocket message envelopes (§4.5, §4.12, §6).
//!
//! Every frame is a JSON object with a mandatory `type` field; unknown
//! types are ignored by receivers rather than treated as an error, so
//! these enums are only used for the message shapes this spec defines
//! — an unrecognized `type` on the wire deserializes to `Err` and the
//! caller falls back to a raw `serde_json::Value` inspection instead of
//! failing the whole socket.

use crate::ids::{AppGroupId, ChildId, DeviceId, FamilyId, TanId, UserId};
use crate::enums::TanType;
use crate::rules::ResolvedRules;
use serde::{Deserialize, Serialize};

/// Frames sent from the server to a device agent after the token
/// handshake (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToDeviceMessage {
    AuthOk {
        device_id: DeviceId,
    },
    RulesUpdated {
        rules: ResolvedRules,
    },
    BlockApp {
        group_id: AppGroupId,
    },
    UnblockApp {
        group_id: AppGroupId,
    },
    TanActivated {
        tan_id: TanId,
        tan_type: TanType,
        value_minutes: Option<i64>,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    TanRedeemed {
        tan_id: TanId,
    },
    HeartbeatAck,
    Pong {
        server_time: chrono::DateTime<chrono::Utc>,
    },
    Ack {
        received_type: Option<String>,
    },
}

/// Frames sent from a device agent to the server, once authenticated
/// (§4.5). The very first frame on a fresh connection is the raw
/// device token as plain text, not one of these variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceToServerMessage {
    Ping,
    Heartbeat,
    UsageUpdate {
        app_package: Option<String>,
        app_group_id: Option<AppGroupId>,
        duration_seconds: i64,
    },
}

/// Frames sent from the server to an authenticated parent portal
/// connection (§6 "Parent portal WebSocket"). The portal itself is out
/// of scope to build; these types fix the contract this crate emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToPortalMessage {
    AuthOk {
        user_id: UserId,
        family_id: FamilyId,
    },
    Invalidate {
        keys: Vec<Vec<String>>,
    },
    Notification {
        title: String,
        message: String,
        category: NotificationCategory,
        timestamp: chrono::DateTime<chrono::Utc>,
        child_id: Option<ChildId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Info,
    Quest,
    Tan,
    Device,
}
