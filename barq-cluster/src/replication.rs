//! Primary/replica role management, write log, replica fan-out, and catch-up (§4.8, C8).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::cache_sync::CacheSync;
use crate::coordinator::Coordinator;
use crate::error::ReplicationError;
use crate::legacy::{NodeId, ShardId};
use crate::storage_adapter::{StorageAdapter, StorageAdapterExt};
use crate::transport::Transport;
use crate::types::{RuntimeReplicationLog, WriteKind, WriteOperation};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConsistencyMode {
    #[default]
    Eventual,
    Strong,
    Bounded,
}

/// A node's role is a tagged variant per the Design Notes' "role transitions" guidance: the
/// upstream-primary connection only exists for `Replica`, never as a dangling optional field.
#[derive(Clone, Debug)]
pub enum ReplicaRole {
    Primary,
    Replica { upstream: NodeId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUpdatesArgs {
    pub shard: String,
    pub from_sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteArgs {
    pub shard: String,
    pub kind: WriteKind,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadArgs {
    pub shard: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateWriteArgs {
    pub shard: String,
    pub op: WriteOperation,
}

struct State {
    role: ReplicaRole,
    log: RuntimeReplicationLog,
    last_primary_sync: chrono::DateTime<Utc>,
}

/// One shard's replication state on this node. `Replication` is keyed by shard in practice
/// (`Cluster` holds one per locally-hosted shard); kept single here to match `CacheSync`'s
/// per-process scope.
pub struct Replication {
    node_id: NodeId,
    shard: ShardId,
    transport: Arc<Transport>,
    cache: Arc<CacheSync>,
    storage: Arc<dyn StorageAdapter>,
    state: RwLock<State>,
    lag_ms: AtomicI64,
}

impl Replication {
    pub fn new(node_id: NodeId, shard: ShardId, transport: Arc<Transport>, cache: Arc<CacheSync>, storage: Arc<dyn StorageAdapter>, role: ReplicaRole) -> Self {
        Self {
            node_id,
            shard,
            transport,
            cache,
            storage,
            state: RwLock::new(State { role, log: RuntimeReplicationLog::default(), last_primary_sync: Utc::now() }),
            lag_ms: AtomicI64::new(0),
        }
    }

    /// Initial role is derived from "am I leader?" (§4.8's `auto` policy, resolved to this
    /// rule everywhere in the runtime).
    pub fn from_leadership(node_id: NodeId, shard: ShardId, transport: Arc<Transport>, cache: Arc<CacheSync>, storage: Arc<dyn StorageAdapter>, is_leader: bool, leader: Option<NodeId>) -> Self {
        let role = if is_leader {
            ReplicaRole::Primary
        } else {
            ReplicaRole::Replica { upstream: leader.unwrap_or_else(|| node_id.clone()) }
        };
        Self::new(node_id, shard, transport, cache, storage, role)
    }

    /// Storage-backed key for this shard's write-through copy of an item, per §6's
    /// `_cluster/shards/...` layout convention.
    fn item_key(&self, key: &str) -> String {
        format!("_cluster/shards/{}/items/{key}", self.shard.label())
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.state.read().unwrap().role, ReplicaRole::Primary)
    }

    pub fn set_role(&self, role: ReplicaRole) {
        self.state.write().unwrap().role = role;
    }

    /// Primary-only: appends a `WriteOperation`, fans out best-effort to replicas, and writes
    /// through to `CacheSync`. Per-replica failures never fail the write.
    pub async fn write(&self, kind: WriteKind, payload: serde_json::Value, replicas: &[NodeId]) -> Result<WriteOperation, ReplicationError> {
        if !self.is_primary() {
            return Err(ReplicationError::NotPrimary(self.shard));
        }
        let op = {
            let mut state = self.state.write().unwrap();
            state.log.primary_version += 1;
            let op = WriteOperation {
                id: Uuid::new_v4(),
                kind,
                payload: payload.clone(),
                timestamp: Utc::now(),
                version: state.log.primary_version,
            };
            state.log.append(op.clone());
            op
        };

        for replica in replicas {
            let transport = self.transport.clone();
            let replica = replica.clone();
            let fan_out = serde_json::json!({ "shard": self.shard.label(), "op": op });
            tokio::spawn(async move {
                if let Err(err) = transport.call(&replica, "replicateWrite", fan_out).await {
                    warn!(node = %replica.0, error = %err, "replication fan-out failed");
                }
            });
        }

        let key = payload_key(&payload);
        let item_key = self.item_key(&key);
        match op.kind {
            WriteKind::Delete => {
                self.cache.delete(key);
                if let Err(err) = self.storage.save_json(&item_key, &serde_json::Value::Null).await {
                    warn!(shard = %self.shard.label(), error = %err, "storage tombstone write failed");
                }
            }
            _ => {
                self.cache.set(key, payload.clone(), None);
                if let Err(err) = self.storage.save_json(&item_key, &payload).await {
                    warn!(shard = %self.shard.label(), error = %err, "storage write-through failed");
                }
            }
        }
        Ok(op)
    }

    /// Non-primary: forward to the primary over RPC, returning whatever id it assigns.
    pub async fn forward_write(&self, primary: &NodeId, kind: WriteKind, payload: serde_json::Value) -> Result<WriteOperation, ReplicationError> {
        let request = serde_json::json!({ "shard": self.shard.label(), "kind": kind, "payload": payload });
        let response = self
            .transport
            .call(primary, "write", request)
            .await
            .map_err(|_| ReplicationError::PrimaryUnreachable(self.shard))?;
        serde_json::from_value(response).map_err(|e| ReplicationError::InconsistentRead(e.to_string()))
    }

    /// Read path per the configured consistency mode (§4.8): `Strong` goes to the primary over
    /// RPC; otherwise `CacheSync` is consulted first and, on a miss, local storage is the
    /// fallback rather than reporting a false negative.
    pub async fn read(&self, key: &str, mode: ConsistencyMode, primary: Option<&NodeId>) -> Result<Option<serde_json::Value>, ReplicationError> {
        if mode == ConsistencyMode::Strong && !self.is_primary() {
            let primary = primary.ok_or(ReplicationError::PrimaryUnreachable(self.shard))?;
            let response = self
                .transport
                .call(primary, "read", serde_json::json!({ "shard": self.shard.label(), "key": key }))
                .await
                .map_err(|_| ReplicationError::PrimaryUnreachable(self.shard))?;
            return Ok(response.get("value").cloned());
        }
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value));
        }
        self.read_through_storage(key).await
    }

    /// Falls back to `StorageAdapter` when `CacheSync` has no entry, treating a stored `null`
    /// (the tombstone `write()`/`apply_operation()` leave behind for a delete) the same as an
    /// absent key.
    async fn read_through_storage(&self, key: &str) -> Result<Option<serde_json::Value>, ReplicationError> {
        let item_key = self.item_key(key);
        let stored: Option<serde_json::Value> = self
            .storage
            .get_json(&item_key)
            .await
            .map_err(|e| ReplicationError::InconsistentRead(e.to_string()))?;
        Ok(stored.filter(|v| !v.is_null()))
    }

    /// Replica catch-up: pulls and applies everything after `from_sequence`.
    pub async fn catch_up(&self, primary: &NodeId) -> Result<usize, ReplicationError> {
        let from_sequence = self.state.read().unwrap().log.last_sequence;
        let args = GetUpdatesArgs { shard: self.shard.label(), from_sequence };
        let response = self
            .transport
            .call(primary, "getUpdates", serde_json::to_value(&args).unwrap())
            .await
            .map_err(|_| ReplicationError::PrimaryUnreachable(self.shard))?;
        let ops: Vec<WriteOperation> = serde_json::from_value(response).map_err(|e| ReplicationError::InconsistentRead(e.to_string()))?;
        let applied = ops.len();
        for op in ops {
            self.apply_operation(op).await;
        }
        self.state.write().unwrap().last_primary_sync = Utc::now();
        self.lag_ms.store(0, Ordering::SeqCst);
        Ok(applied)
    }

    /// Idempotent application: deduplicates on `(id, version)`, per §8's round-trip law.
    pub async fn apply_operation(&self, op: WriteOperation) {
        {
            let state = self.state.read().unwrap();
            if state.log.entries.iter().any(|existing| existing.id == op.id) {
                return;
            }
        }
        let key = payload_key(&op.payload);
        let item_key = self.item_key(&key);
        match op.kind {
            WriteKind::Delete => {
                self.cache.delete(key);
                if let Err(err) = self.storage.save_json(&item_key, &serde_json::Value::Null).await {
                    warn!(shard = %self.shard.label(), error = %err, "storage tombstone write failed");
                }
            }
            _ => {
                self.cache.set(key, op.payload.clone(), None);
                if let Err(err) = self.storage.save_json(&item_key, &op.payload).await {
                    warn!(shard = %self.shard.label(), error = %err, "storage write-through failed");
                }
            }
        }
        self.state.write().unwrap().log.append(op);
    }

    pub fn updates_since(&self, from_sequence: u64) -> Vec<WriteOperation> {
        self.state.read().unwrap().log.updates_since(from_sequence)
    }

    /// `now - lastPrimarySyncTimestamp` for a replica, zero for a primary.
    pub fn replication_lag(&self) -> chrono::Duration {
        if self.is_primary() {
            return chrono::Duration::zero();
        }
        Utc::now() - self.state.read().unwrap().last_primary_sync
    }

    pub fn last_sequence(&self) -> u64 {
        self.state.read().unwrap().log.last_sequence
    }

    /// Serves a `read` RPC landing here because the caller resolved this node as primary; same
    /// cache-then-storage fallback as [`Replication::read`].
    pub async fn local_read(&self, key: &str) -> Result<Option<serde_json::Value>, ReplicationError> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value));
        }
        self.read_through_storage(key).await
    }
}

/// Owns the per-shard [`Replication`] instances a node accumulates as shards are assigned to
/// it, creating each lazily from the coordinator's current leadership view on first touch.
pub struct ReplicationRegistry {
    node_id: NodeId,
    transport: Arc<Transport>,
    cache_sync: Arc<CacheSync>,
    storage: Arc<dyn StorageAdapter>,
    coordinator: Arc<Coordinator>,
    replicas: DashMap<ShardId, Arc<Replication>>,
}

impl ReplicationRegistry {
    pub fn new(node_id: NodeId, transport: Arc<Transport>, cache_sync: Arc<CacheSync>, storage: Arc<dyn StorageAdapter>, coordinator: Arc<Coordinator>) -> Self {
        Self { node_id, transport, cache_sync, storage, coordinator, replicas: DashMap::new() }
    }

    pub fn get_or_create(&self, shard: ShardId) -> Arc<Replication> {
        self.replicas
            .entry(shard)
            .or_insert_with(|| {
                Arc::new(Replication::from_leadership(
                    self.node_id.clone(),
                    shard,
                    self.transport.clone(),
                    self.cache_sync.clone(),
                    self.storage.clone(),
                    self.coordinator.is_leader(),
                    self.coordinator.leader(),
                ))
            })
            .clone()
    }
}

fn payload_key(payload: &serde_json::Value) -> String {
    payload
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}
