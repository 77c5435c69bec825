//! Error kinds for the dynamic coordination engine (distinct from `legacy::ClusterError`,
//! which stays scoped to static routing).

use thiserror::Error;

use crate::legacy::{NodeId, ShardId};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no endpoint registered for node {0:?}")]
    NoEndpoint(NodeId),

    #[error("rpc to {node:?}::{method} timed out after {timeout_ms}ms")]
    Timeout { node: NodeId, method: String, timeout_ms: u64 },

    #[error("failed to bind transport after {attempts} attempts")]
    BindError { attempts: u32 },

    #[error("remote error {code} from {node:?}: {message}")]
    RemoteError { node: NodeId, code: i64, message: String },

    #[error("failed to parse message: {0}")]
    ParseError(String),

    #[error("stream {0} does not support this operation")]
    NotImplemented(String),

    #[error("transport already stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("this node is not the leader (current leader: {0:?})")]
    NotLeader(Option<NodeId>),

    #[error("stale term {provided} observed, current term is {current}")]
    StaleTerm { provided: u64, current: u64 },

    #[error("log mismatch at index {index}: expected term {expected}, found {found}")]
    LogMismatch { index: u64, expected: u64, found: u64 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("validation failed for migration {0}: {1}")]
    ValidationFailed(uuid::Uuid, String),

    #[error("consensus hand-off for migration {0} timed out")]
    ConsensusTimeout(uuid::Uuid),

    #[error("migration {0} was cancelled")]
    Cancelled(uuid::Uuid),

    #[error("migration {0} not found")]
    NotFound(uuid::Uuid),

    #[error("migration concurrency limit ({0}) reached, request queued")]
    AtCapacity(usize),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("node is not the primary for shard {0:?}")]
    NotPrimary(ShardId),

    #[error("primary for shard {0:?} is unreachable")]
    PrimaryUnreachable(ShardId),

    #[error("inconsistent read: {0}")]
    InconsistentRead(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ShardingError {
    #[error("shard {0:?} not found")]
    ShardNotFound(ShardId),

    #[error("shard {0:?} has no primary")]
    NoPrimary(ShardId),

    #[error("ring has no members")]
    EmptyRing,
}

/// Top-level error uniting every component error so cross-component call chains can use `?`.
#[derive(Debug, Error)]
pub enum ClusterRuntimeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Sharding(#[from] ShardingError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
