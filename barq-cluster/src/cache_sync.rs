//! Process-local write-through cache with per-key version vectors and batched sync messages
//! (§4.7, C7).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::debug;

use crate::legacy::NodeId;
use crate::transport::Transport;
use crate::types::{CacheEntry, SyncEntry, SyncKind, SyncMessage, VersionVector};

struct State {
    cache: HashMap<String, CacheEntry>,
    versions: VersionVector,
    pending: Vec<SyncEntry>,
}

/// Eventually-consistent key/value cache. The version-wins merge rule is the only conflict
/// resolution strategy: ties are rejected, per §8's universal invariant.
pub struct CacheSync {
    node_id: NodeId,
    transport: Arc<Transport>,
    state: Mutex<State>,
    batch_size: usize,
}

impl CacheSync {
    pub fn new(node_id: NodeId, transport: Arc<Transport>, batch_size: usize) -> Self {
        Self {
            node_id,
            transport,
            state: Mutex::new(State { cache: HashMap::new(), versions: HashMap::new(), pending: Vec::new() }),
            batch_size,
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut state = self.state.lock().unwrap();
        let expired = state.cache.get(key).map(|entry| entry.is_expired()).unwrap_or(false);
        if expired {
            state.cache.remove(key);
            return None;
        }
        state.cache.get(key).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl: Option<chrono::Duration>) {
        let key = key.into();
        let mut state = self.state.lock().unwrap();
        let version = state.versions.entry(key.clone()).or_insert(0);
        *version += 1;
        let version = *version;
        state.cache.insert(
            key.clone(),
            CacheEntry { key: key.clone(), value: value.clone(), version, timestamp: Utc::now(), ttl, originator: self.node_id.clone() },
        );
        state.pending.push(SyncEntry { key, value: Some(value), version, ttl, kind: SyncKind::Update });
        self.maybe_flush(&mut state);
    }

    pub fn delete(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state.lock().unwrap();
        let version = state.versions.entry(key.clone()).or_insert(0);
        *version += 1;
        let version = *version;
        state.cache.remove(&key);
        state.pending.push(SyncEntry { key, value: None, version, ttl: None, kind: SyncKind::Delete });
        self.maybe_flush(&mut state);
    }

    pub fn invalidate(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state.lock().unwrap();
        let version = state.versions.entry(key.clone()).or_insert(0);
        *version += 1;
        let version = *version;
        state.cache.remove(&key);
        state.pending.push(SyncEntry { key, value: None, version, ttl: None, kind: SyncKind::Invalidate });
        self.maybe_flush(&mut state);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        let keys: Vec<String> = state.cache.keys().cloned().collect();
        for key in &keys {
            let version = state.versions.entry(key.clone()).or_insert(0);
            *version += 1;
            let version = *version;
            state.pending.push(SyncEntry { key: key.clone(), value: None, version, ttl: None, kind: SyncKind::Delete });
        }
        state.cache.clear();
        self.maybe_flush(&mut state);
    }

    fn maybe_flush(&self, state: &mut State) {
        if state.pending.len() >= self.batch_size {
            self.flush_locked(state);
        }
    }

    /// Periodic timer entry point (§4.7's default-1s flush); coalesces more than one queued
    /// message into a single `batch` sync message.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state);
    }

    fn flush_locked(&self, state: &mut State) {
        if state.pending.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut state.pending);
        let kind = if entries.len() > 1 { SyncKind::Batch } else { entries[0].kind };
        let message = SyncMessage { kind, entries, source: self.node_id.clone(), timestamp: Utc::now() };
        self.transport.broadcast("cacheSync", serde_json::to_value(&message).unwrap());
    }

    /// Inbound handling: rejects self-originated messages and anything not strictly newer than
    /// the locally observed version (ties reject — the version-wins rule).
    pub fn apply_inbound(&self, message: SyncMessage) {
        if message.source == self.node_id {
            return;
        }
        let mut state = self.state.lock().unwrap();
        for entry in message.entries {
            self.apply_entry(&mut state, entry);
        }
    }

    fn apply_entry(&self, state: &mut State, entry: SyncEntry) {
        let local_version = state.versions.get(&entry.key).copied().unwrap_or(0);
        if entry.version <= local_version {
            debug!(key = %entry.key, entry.version, local_version, "rejected stale/duplicate sync entry");
            return;
        }
        state.versions.insert(entry.key.clone(), entry.version);
        match entry.kind {
            SyncKind::Update | SyncKind::Batch if entry.value.is_some() => {
                state.cache.insert(
                    entry.key.clone(),
                    CacheEntry {
                        key: entry.key,
                        value: entry.value.unwrap(),
                        version: entry.version,
                        timestamp: Utc::now(),
                        ttl: entry.ttl,
                        originator: self.node_id.clone(),
                    },
                );
            }
            _ => {
                state.cache.remove(&entry.key);
            }
        }
    }

    /// Recovery path: apply each entry as if received from a peer, honoring version-wins.
    pub fn merge_state(&self, entries: Vec<SyncEntry>) {
        let mut state = self.state.lock().unwrap();
        for entry in entries {
            self.apply_entry(&mut state, entry);
        }
    }

    pub fn version_of(&self, key: &str) -> u64 {
        self.state.lock().unwrap().versions.get(key).copied().unwrap_or(0)
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache(node: &str) -> CacheSync {
        let transport = Arc::new(Transport::new(NodeId::new(node), Duration::from_secs(5), Duration::from_secs(15)));
        CacheSync::new(NodeId::new(node), transport, 50)
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = cache("n0");
        cache.set("a", serde_json::json!(1), None);
        assert_eq!(cache.get("a"), Some(serde_json::json!(1)));
    }

    #[test]
    fn delete_removes_entry_and_bumps_version() {
        let cache = cache("n0");
        cache.set("a", serde_json::json!(1), None);
        cache.delete("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.version_of("a"), 2);
    }

    #[test]
    fn self_originated_messages_are_ignored() {
        let cache = cache("n0");
        let message = SyncMessage {
            kind: SyncKind::Update,
            entries: vec![SyncEntry { key: "a".into(), value: Some(serde_json::json!(99)), version: 5, ttl: None, kind: SyncKind::Update }],
            source: NodeId::new("n0"),
            timestamp: Utc::now(),
        };
        cache.apply_inbound(message);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn version_wins_convergence_matches_seed_scenario() {
        let n0 = cache("n0");
        let n1 = cache("n1");
        n0.set("a", serde_json::json!(1), None);
        n1.set("a", serde_json::json!(2), None);

        let from_n1 = SyncMessage {
            kind: SyncKind::Update,
            entries: vec![SyncEntry { key: "a".into(), value: Some(serde_json::json!(2)), version: 1, ttl: None, kind: SyncKind::Update }],
            source: NodeId::new("n1"),
            timestamp: Utc::now(),
        };
        n0.apply_inbound(from_n1);
        assert_eq!(n0.get("a"), Some(serde_json::json!(1)));

        n0.set("a", serde_json::json!(3), None);
        assert_eq!(n0.version_of("a"), 2);

        let from_n0 = SyncMessage {
            kind: SyncKind::Update,
            entries: vec![SyncEntry { key: "a".into(), value: Some(serde_json::json!(3)), version: 2, ttl: None, kind: SyncKind::Update }],
            source: NodeId::new("n0"),
            timestamp: Utc::now(),
        };
        n1.apply_inbound(from_n0);
        assert_eq!(n1.get("a"), Some(serde_json::json!(3)));
        assert_eq!(n1.version_of("a"), 2);
    }

    #[test]
    fn applying_same_sync_message_twice_is_a_no_op() {
        let cache = cache("n0");
        let entry = SyncEntry { key: "a".into(), value: Some(serde_json::json!(1)), version: 1, ttl: None, kind: SyncKind::Update };
        let message = SyncMessage { kind: SyncKind::Update, entries: vec![entry.clone()], source: NodeId::new("n1"), timestamp: Utc::now() };
        cache.apply_inbound(message.clone());
        cache.apply_inbound(message);
        assert_eq!(cache.version_of("a"), 1);
        assert_eq!(cache.get("a"), Some(serde_json::json!(1)));
    }

    #[test]
    fn expired_entry_is_purged_on_read() {
        let cache = cache("n0");
        cache.set("a", serde_json::json!(1), Some(chrono::Duration::milliseconds(-1)));
        assert_eq!(cache.get("a"), None);
    }
}
