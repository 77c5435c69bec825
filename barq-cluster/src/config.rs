//! Environment inputs for the coordination engine (§6), with their §4 defaults.
//!
//! Mirrors `barq-api`'s `Cli` struct: a `clap` `Parser` with `env` fallbacks so the same knobs
//! work from flags, environment variables, or (via `Default`) an embedded `barq-server`.

use std::time::Duration;

#[cfg_attr(feature = "cli", derive(clap::Parser))]
#[cfg_attr(feature = "cli", command(name = "barq-cluster", about = "Barq cluster coordination engine"))]
#[derive(Debug, Clone)]
pub struct ClusterRuntimeConfig {
    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_NODE_ID"))]
    pub node_id: String,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_BIND_HOST", default_value = "0.0.0.0"))]
    pub bind_host: String,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_BIND_PORT", default_value_t = 7700))]
    pub bind_port: u16,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_DISCOVERY", default_value = "storage"))]
    pub discovery_policy: String,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_ROLE", default_value = "auto"))]
    pub role_override: String,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_SHARD_COUNT", default_value_t = 64))]
    pub shard_count: u32,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_REPLICATION_FACTOR", default_value_t = 2))]
    pub replication_factor: u32,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_VIRTUAL_NODES", default_value_t = 150))]
    pub virtual_nodes_per_physical: u32,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_HEARTBEAT_MS", default_value_t = 1000))]
    pub heartbeat_interval_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_ELECTION_TIMEOUT_MS", default_value_t = 5000))]
    pub election_timeout_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_NODE_TIMEOUT_MS", default_value_t = 30_000))]
    pub node_timeout_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_DISCOVERY_HEARTBEAT_MS", default_value_t = 5000))]
    pub discovery_heartbeat_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_DISCOVERY_LOOP_MS", default_value_t = 2000))]
    pub discovery_loop_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_MIGRATION_BATCH_SIZE", default_value_t = 1000))]
    pub migration_batch_size: usize,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_MIGRATION_CONCURRENCY", default_value_t = 2))]
    pub migration_concurrency: usize,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_CONSENSUS_TIMEOUT_MS", default_value_t = 30_000))]
    pub consensus_timeout_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_RPC_TIMEOUT_MS", default_value_t = 30_000))]
    pub rpc_timeout_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_CACHE_SYNC_INTERVAL_MS", default_value_t = 1000))]
    pub cache_sync_interval_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_CACHE_SYNC_BATCH_SIZE", default_value_t = 50))]
    pub cache_sync_batch_size: usize,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_REPLICA_SYNC_INTERVAL_MS", default_value_t = 1000))]
    pub replica_sync_interval_ms: u64,

    #[cfg_attr(feature = "cli", arg(long, env = "BARQ_SSE_KEEPALIVE_MS", default_value_t = 15_000))]
    pub sse_keepalive_ms: u64,
}

impl Default for ClusterRuntimeConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            bind_host: "0.0.0.0".into(),
            bind_port: 7700,
            discovery_policy: "storage".into(),
            role_override: "auto".into(),
            shard_count: 64,
            replication_factor: 2,
            virtual_nodes_per_physical: 150,
            heartbeat_interval_ms: 1000,
            election_timeout_ms: 5000,
            node_timeout_ms: 30_000,
            discovery_heartbeat_ms: 5000,
            discovery_loop_ms: 2000,
            migration_batch_size: 1000,
            migration_concurrency: 2,
            consensus_timeout_ms: 30_000,
            rpc_timeout_ms: 30_000,
            cache_sync_interval_ms: 1000,
            cache_sync_batch_size: 50,
            replica_sync_interval_ms: 1000,
            sse_keepalive_ms: 15_000,
        }
    }
}

impl ClusterRuntimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn discovery_loop_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_loop_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn consensus_timeout(&self) -> Duration {
        Duration::from_millis(self.consensus_timeout_ms)
    }

    pub fn cache_sync_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sync_interval_ms)
    }

    pub fn replica_sync_interval(&self) -> Duration {
        Duration::from_millis(self.replica_sync_interval_ms)
    }

    pub fn sse_keepalive(&self) -> Duration {
        Duration::from_millis(self.sse_keepalive_ms)
    }

    /// A randomized election timeout in `[T, 2T)`, per §4.5.
    pub fn randomized_election_timeout(&self) -> Duration {
        use rand::Rng;
        let base = self.election_timeout_ms;
        let jitter = rand::thread_rng().gen_range(0..=base);
        Duration::from_millis(base + jitter)
    }
}
