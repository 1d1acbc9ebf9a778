//! Connection registry (§4.3): process-wide map of connected device and
//! parent-portal sockets. Grounded in
//! `original_source/backend/app/services/connection_manager.py`.
//!
//! Every mutation serializes through one `std::sync::Mutex`, but the
//! actual socket write happens outside the lock: each connection owns
//! an `mpsc::UnboundedSender<Message>`, and `send_to_device` only
//! enqueues onto it. The real websocket write loop lives in the task
//! that called `connect`/`connect_parent` and drains the matching
//! receiver. This is the one deliberate deviation from a literal port
//! of the Python (which awaits `websocket.send_json` directly): holding
//! a mutex across an await is a foot-gun this workspace avoids
//! elsewhere, and the per-socket channel still preserves in-order
//! delivery to a given socket (§8 invariant 8) since only one writer
//! ever drains it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use axum::extract::ws::Message;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type Outbox = mpsc::UnboundedSender<Message>;

struct DeviceConn {
    child_id: Uuid,
    sender: Outbox,
}

#[derive(Default)]
struct RegistryState {
    devices: HashMap<Uuid, DeviceConn>,
    child_devices: HashMap<Uuid, HashSet<Uuid>>,
    parent_sockets: HashMap<Uuid, HashMap<Uuid, Outbox>>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly-authenticated device socket. A prior
    /// connection for the same device is evicted: dropping its sender
    /// closes that channel, which causes its writer loop's `recv()` to
    /// return `None` and wind down on its own. Returns the receiver the
    /// caller's write loop drains plus a clone of the installed sender,
    /// which the caller must hand back to `disconnect` so it can be
    /// compared by channel identity.
    pub fn connect(&self, device_id: Uuid, child_id: Uuid) -> (mpsc::UnboundedReceiver<Message>, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.devices.insert(device_id, DeviceConn { child_id, sender: tx.clone() });
        state.child_devices.entry(child_id).or_default().insert(device_id);
        (rx, tx)
    }

    /// Removes `device_id` iff its currently-registered sender is the
    /// one the caller holds (guards against a disconnect racing a
    /// newer reconnect for the same device).
    pub fn disconnect(&self, device_id: Uuid, child_id: Uuid, sender: &Outbox) {
        let mut state = self.state.lock().unwrap();
        if let Some(conn) = state.devices.get(&device_id) {
            if !conn.sender.same_channel(sender) {
                return;
            }
        } else {
            return;
        }
        state.devices.remove(&device_id);
        if let Some(set) = state.child_devices.get_mut(&child_id) {
            set.remove(&device_id);
            if set.is_empty() {
                state.child_devices.remove(&child_id);
            }
        }
    }

    pub fn send_to_device<T: Serialize>(&self, device_id: Uuid, message: &T) -> bool {
        let payload = match serde_json::to_string(message) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.devices.get(&device_id) else {
            return false;
        };
        if conn.sender.send(Message::Text(payload.into())).is_ok() {
            true
        } else {
            state.devices.remove(&device_id);
            false
        }
    }

    pub fn send_to_child_devices<T: Serialize>(&self, child_id: Uuid, message: &T) -> usize {
        let device_ids: Vec<Uuid> = {
            let state = self.state.lock().unwrap();
            state
                .child_devices
                .get(&child_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };
        device_ids
            .into_iter()
            .filter(|id| self.send_to_device(*id, message))
            .count()
    }

    pub fn connect_parent(&self, family_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
        let socket_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state
            .parent_sockets
            .entry(family_id)
            .or_default()
            .insert(socket_id, tx);
        (socket_id, rx)
    }

    pub fn disconnect_parent(&self, family_id: Uuid, socket_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        if let Some(sockets) = state.parent_sockets.get_mut(&family_id) {
            sockets.remove(&socket_id);
            if sockets.is_empty() {
                state.parent_sockets.remove(&family_id);
            }
        }
    }

    pub fn notify_parents<T: Serialize>(&self, family_id: Uuid, message: &T) -> usize {
        let payload = match serde_json::to_string(message) {
            Ok(s) => s,
            Err(_) => return 0,
        };
        let mut state = self.state.lock().unwrap();
        let Some(sockets) = state.parent_sockets.get_mut(&family_id) else {
            return 0;
        };
        let mut dead = Vec::new();
        let mut delivered = 0;
        for (id, sender) in sockets.iter() {
            if sender.send(Message::Text(payload.clone().into())).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            sockets.remove(&id);
        }
        if sockets.is_empty() {
            state.parent_sockets.remove(&family_id);
        }
        delivered
    }

    pub fn is_connected(&self, device_id: Uuid) -> bool {
        self.state.lock().unwrap().devices.contains_key(&device_id)
    }

    pub fn get_connected_count(&self, child_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .child_devices
            .get(&child_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_connect_evicts_prior_for_same_device() {
        let registry = ConnectionRegistry::new();
        let device_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        let (mut first_rx, _first_tx) = registry.connect(device_id, child_id);
        let (_second_rx, _second_tx) = registry.connect(device_id, child_id);

        assert!(registry.send_to_device(device_id, &json!({"type": "ping"})));
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn send_to_child_devices_counts_only_live_sockets() {
        let registry = ConnectionRegistry::new();
        let child_id = Uuid::new_v4();
        let d1 = Uuid::new_v4();
        let d2 = Uuid::new_v4();
        let _rx1 = registry.connect(d1, child_id);
        let _rx2 = registry.connect(d2, child_id);
        let delivered = registry.send_to_child_devices(child_id, &json!({"type": "rules_updated"}));
        assert_eq!(delivered, 2);
        assert_eq!(registry.get_connected_count(child_id), 2);
    }

    #[test]
    fn disconnect_ignores_stale_sender() {
        let registry = ConnectionRegistry::new();
        let device_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        let _old_rx = registry.connect(device_id, child_id);
        let old_sender = registry.state.lock().unwrap().devices[&device_id].sender.clone();
        let _new_rx = registry.connect(device_id, child_id);

        registry.disconnect(device_id, child_id, &old_sender);
        assert!(registry.is_connected(device_id));
    }
}
