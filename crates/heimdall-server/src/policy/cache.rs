//! In-process 30 s-TTL memo of resolved rules, keyed by device (§4.1
//! "Caching"). No external cache service — the reference daemon
//! prefers in-process `Arc<Mutex<...>>` state over Redis-style
//! infrastructure, and this spec has no external-cache dependency to
//! reuse, so the same preference carries over here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use heimdall_types::ResolvedRules;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct RulesCache {
    entries: Mutex<HashMap<Uuid, (Instant, ResolvedRules)>>,
}

impl RulesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh cached entry, if any. A poisoned lock (should
    /// never happen; nothing panics while holding it) is treated as a
    /// miss rather than propagated, since the cache is always
    /// best-effort.
    pub fn get(&self, device_id: Uuid) -> Option<ResolvedRules> {
        let entries = self.entries.lock().ok()?;
        let (inserted_at, rules) = entries.get(&device_id)?;
        if inserted_at.elapsed() < TTL {
            Some(rules.clone())
        } else {
            None
        }
    }

    /// Overwrite the entry for `device_id`, whether it existed or not.
    /// Called after every resolution, bypassed or not, so invalidation
    /// is implicit: a bypassed resolve simply recomputes then refreshes
    /// the entry other readers will see.
    pub fn put(&self, device_id: Uuid, rules: ResolvedRules) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(device_id, (Instant::now(), rules));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResolvedRules {
        ResolvedRules::unknown()
    }

    #[test]
    fn miss_then_hit() {
        let cache = RulesCache::new();
        let id = Uuid::new_v4();
        assert!(cache.get(id).is_none());
        cache.put(id, sample());
        assert!(cache.get(id).is_some());
    }

    #[test]
    fn overwrite_replaces_entry() {
        let cache = RulesCache::new();
        let id = Uuid::new_v4();
        cache.put(id, sample());
        let mut updated = sample();
        updated.day_type = "weekend".to_string();
        cache.put(id, updated.clone());
        assert_eq!(cache.get(id).unwrap().day_type, "weekend");
    }
}
