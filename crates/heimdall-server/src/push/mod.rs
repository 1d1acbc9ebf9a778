//! Rule-push orchestrator (§4.4): on any policy mutation, recompute and
//! fan out fresh state to connected sockets. Grounded in
//! `original_source/backend/app/services/rule_push_service.py`.

use chrono::{DateTime, Utc};
use heimdall_types::enums::TanType;
use heimdall_types::ids::{ChildId, TanId};
use heimdall_types::ws::{NotificationCategory, ServerToDeviceMessage, ServerToPortalMessage};
use uuid::Uuid;

use crate::error::HeimdallResult;
use crate::policy::{resolve_rules, RulesCache};
use crate::registry::ConnectionRegistry;
use crate::storage::Storage;

/// Recomputes (cache-bypassed) and pushes `rules_updated` to every
/// device belonging to `child_id`. Devices with no open socket simply
/// keep serving their last-cached policy until their next poll — this
/// is not a failure, the spec treats it as expected.
pub async fn push_rules_to_child_devices(
    storage: &Storage,
    cache: &RulesCache,
    registry: &ConnectionRegistry,
    child_id: Uuid,
) -> HeimdallResult<usize> {
    let devices = storage.list_devices_for_child(child_id).await?;
    let mut pushed = 0;
    for device in devices {
        let device_id = Uuid::parse_str(&device.id)
            .map_err(|e| crate::error::HeimdallError::Internal(e.into()))?;
        if push_rules_to_device(storage, cache, registry, device_id).await? {
            pushed += 1;
        }
    }
    Ok(pushed)
}

pub async fn push_rules_to_device(
    storage: &Storage,
    cache: &RulesCache,
    registry: &ConnectionRegistry,
    device_id: Uuid,
) -> HeimdallResult<bool> {
    let rules = resolve_rules(storage, cache, device_id, true).await?;
    let message = ServerToDeviceMessage::RulesUpdated { rules };
    Ok(registry.send_to_device(device_id, &message))
}

pub fn notify_tan_activated(
    registry: &ConnectionRegistry,
    child_id: Uuid,
    tan_id: Uuid,
    tan_type: TanType,
    value_minutes: Option<i64>,
    expires_at: DateTime<Utc>,
) -> usize {
    let message = ServerToDeviceMessage::TanActivated {
        tan_id: TanId::from(tan_id),
        tan_type,
        value_minutes,
        expires_at,
    };
    registry.send_to_child_devices(child_id, &message)
}

/// Opaque TanStack-Query-style invalidation keys; the portal that
/// consumes them is out of scope, so this crate only needs to shape
/// the array correctly, not interpret it.
pub fn notify_parent_dashboard(
    registry: &ConnectionRegistry,
    family_id: Uuid,
    event_type: &str,
    child_id: Option<Uuid>,
) -> usize {
    let mut keys = vec![vec![event_type.to_string()]];
    if let Some(child_id) = child_id {
        keys.push(vec![event_type.to_string(), child_id.to_string()]);
    }
    let message = ServerToPortalMessage::Invalidate { keys };
    registry.notify_parents(family_id, &message)
}

/// Toast/notification push — not separately named in the distilled
/// spec's component list, but required by the TAN scheduler (§4.6) and
/// present in the push orchestrator's own source.
pub fn notify_parent_event(
    registry: &ConnectionRegistry,
    family_id: Uuid,
    title: &str,
    message: &str,
    category: NotificationCategory,
    child_id: Option<Uuid>,
) -> usize {
    let payload = ServerToPortalMessage::Notification {
        title: title.to_string(),
        message: message.to_string(),
        category,
        timestamp: Utc::now(),
        child_id: child_id.map(ChildId::from),
    };
    registry.notify_parents(family_id, &payload)
}
