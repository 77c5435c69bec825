//! Data model for the dynamic coordination engine (§3 of the coordination spec).
//!
//! Identifiers are reused from `crate::legacy` (`NodeId`, `ShardId`) so the static router and
//! the runtime engine agree on what a node or a shard is.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::legacy::{NodeId, ShardId};

/// Liveness as observed by the local node's heartbeat tracking.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Active,
    Suspected,
    Inactive,
}

/// Raft role, mirrored on `NodeInfo` for peers observed through gossip/heartbeats.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub cpu_count: u32,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct NodeStatsSnapshot {
    pub document_count: u64,
    pub query_rate: f64,
    pub avg_latency_ms: f64,
}

/// Endpoint a peer can be reached at: an HTTP host/port plus an optional dedicated
/// bulk-stream port used by `ShardMigrator` transfers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub stream_port: Option<u16>,
}

impl Endpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Identity of a peer node (§3 `NodeInfo`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub endpoint: Endpoint,
    pub last_seen: DateTime<Utc>,
    pub liveness: Liveness,
    pub role: RaftRole,
    pub capacity: NodeCapacity,
    pub stats: NodeStatsSnapshot,
}

impl NodeInfo {
    pub fn new(id: NodeId, endpoint: Endpoint) -> Self {
        Self {
            id,
            endpoint,
            last_seen: Utc::now(),
            liveness: Liveness::Active,
            role: RaftRole::Follower,
            capacity: NodeCapacity::default(),
            stats: NodeStatsSnapshot::default(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
        self.liveness = Liveness::Active;
    }

    pub fn is_stale(&self, timeout: chrono::Duration) -> bool {
        Utc::now() - self.last_seen > timeout
    }
}

/// Per-node Raft state (§3 `ConsensusState`).
#[derive(Clone, Debug, Default)]
pub struct ConsensusState {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub leader: Option<NodeId>,
    pub role: RaftRoleState,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RaftRoleState {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl From<RaftRoleState> for RaftRole {
    fn from(value: RaftRoleState) -> Self {
        match value {
            RaftRoleState::Follower => RaftRole::Follower,
            RaftRoleState::Candidate => RaftRole::Candidate,
            RaftRoleState::Leader => RaftRole::Leader,
        }
    }
}

/// An opaque command carried through the Raft log; `Migration` is the one variant every
/// other component needs to know about, everything else stays an opaque byte payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogCommand {
    Migration {
        migration_id: Uuid,
        shard: ShardId,
        from: NodeId,
        to: NodeId,
    },
    Opaque(Vec<u8>),
}

/// An entry in the Raft-style replicated log (§3 `LogEntry`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub command: LogCommand,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Active,
    Rebalancing,
    Offline,
}

/// A logical bucket of the key space (§3 `Shard`), owned exclusively by `ShardManager`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardRecord {
    pub id: ShardId,
    pub primary: Option<NodeId>,
    pub replicas: Vec<NodeId>,
    pub item_count: u64,
    pub byte_size: u64,
    pub status: ShardStatus,
}

impl ShardRecord {
    pub fn new(id: ShardId) -> Self {
        Self {
            id,
            primary: None,
            replicas: Vec::new(),
            item_count: 0,
            byte_size: 0,
            status: ShardStatus::Offline,
        }
    }
}

/// A derived record emitted by `ShardManager` lookups (§3 `ShardAssignment`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardAssignment {
    pub shard: ShardId,
    pub primary: NodeId,
    pub replicas: Vec<NodeId>,
}

impl ShardAssignment {
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.primary.clone()];
        nodes.extend(self.replicas.clone());
        nodes
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Transferring,
    Validating,
    Switching,
    Completed,
    Failed,
}

/// State machine for one shard move (§3 `MigrationTask`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationTask {
    pub id: Uuid,
    pub shard: ShardId,
    pub source: NodeId,
    pub target: NodeId,
    pub status: MigrationStatus,
    pub progress_percent: u8,
    pub items_transferred: u64,
    pub total_items: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl MigrationTask {
    pub fn new(shard: ShardId, source: NodeId, target: NodeId) -> Self {
        Self {
            id: Uuid::new_v4(),
            shard,
            source,
            target,
            status: MigrationStatus::Pending,
            progress_percent: 0,
            items_transferred: 0,
            total_items: 0,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = MigrationStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = MigrationStatus::Completed;
        self.progress_percent = 100;
        self.ended_at = Some(Utc::now());
    }
}

/// `(key, value, version, timestamp, optional ttl, originator nodeId)` (§3 `CacheEntry`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub ttl: Option<chrono::Duration>,
    pub originator: NodeId,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => Utc::now() - self.timestamp > ttl,
            None => false,
        }
    }
}

/// Per-node map from key to last-accepted version (§3 `VersionVector`).
pub type VersionVector = HashMap<String, u64>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Update,
    Delete,
    Invalidate,
    Batch,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncEntry {
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub version: u64,
    pub ttl: Option<chrono::Duration>,
    pub kind: SyncKind,
}

/// `(type, entries[], source nodeId, timestamp)` (§3 `SyncMessage`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncMessage {
    pub kind: SyncKind,
    pub entries: Vec<SyncEntry>,
    pub source: NodeId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Add,
    Update,
    Delete,
}

/// Primary-side log record (§3 `WriteOperation`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteOperation {
    pub id: Uuid,
    pub kind: WriteKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

/// Per-primary ordered sequence of `WriteOperation`s (§3 `ReplicationLog`, renamed
/// `RuntimeReplicationLog` to avoid clashing with `legacy::ReplicationLog`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeReplicationLog {
    pub entries: Vec<WriteOperation>,
    pub last_sequence: u64,
    pub primary_version: u64,
}

impl RuntimeReplicationLog {
    /// Appends a write, deduplicating on `id` (idempotence law in §8).
    pub fn append(&mut self, op: WriteOperation) {
        if self.entries.iter().any(|existing| existing.id == op.id) {
            return;
        }
        self.last_sequence = op.version;
        self.entries.push(op);
    }

    pub fn updates_since(&self, from_sequence: u64) -> Vec<WriteOperation> {
        self.entries
            .iter()
            .filter(|op| op.version > from_sequence)
            .cloned()
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryStrategy {
    LocalOnly,
    Targeted,
    ScatterGather,
    Broadcast,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryPlan {
    pub shards: Vec<ShardId>,
    pub node_assignments: HashMap<ShardId, Vec<NodeId>>,
    pub parallel: bool,
    pub cost: u64,
    pub strategy: QueryStrategy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Vector,
    Triple,
    Filter,
    Scan,
}

/// A query routed through `QueryPlanner`. `entity_key` pins it to a single shard;
/// `partition_hint` pins it to a shard without a key lookup; `shard_hints` pins it to an
/// explicit multi-shard set (a caller-known scatter-gather fan-out); absent all three, it
/// broadcasts to every shard.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ClusterQuery {
    pub kind: Option<QueryKind>,
    pub entity_key: Option<String>,
    pub partition_hint: Option<ShardId>,
    pub shard_hints: Option<Vec<ShardId>>,
    pub payload: serde_json::Value,
}

impl ClusterQuery {
    pub fn classify(&self) -> QueryKind {
        self.kind.unwrap_or(QueryKind::Scan)
    }
}

/// Cluster-wide mutable configuration persisted behind the storage adapter (§3 `ClusterConfig`,
/// renamed `RuntimeClusterConfig` to avoid clashing with `legacy::ClusterConfig`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeClusterConfig {
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub leader: Option<NodeId>,
    pub nodes: HashMap<NodeId, NodeInfo>,
    pub shard_count: u32,
    pub assignments: HashMap<ShardId, Vec<NodeId>>,
    pub replication_factor: u32,
    pub auto_rebalance: bool,
    pub min_node_count: u32,
    pub max_nodes_per_shard: u32,
}

impl RuntimeClusterConfig {
    pub fn bootstrap(self_node: NodeInfo, shard_count: u32, replication_factor: u32) -> Self {
        let mut nodes = HashMap::new();
        let mut assignments = HashMap::new();
        for shard_index in 0..shard_count {
            assignments.insert(ShardId(shard_index), vec![self_node.id.clone()]);
        }
        let node_id = self_node.id.clone();
        nodes.insert(node_id.clone(), self_node);
        Self {
            version: 1,
            updated_at: Utc::now(),
            leader: Some(node_id),
            nodes,
            shard_count,
            assignments,
            replication_factor,
            auto_rebalance: true,
            min_node_count: 1,
            max_nodes_per_shard: replication_factor,
        }
    }
}
