//! Cluster-wide mutable configuration persisted behind the storage adapter (§4.10, C10).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ClusterRuntimeError;
use crate::storage_adapter::StorageAdapter;
use crate::types::RuntimeClusterConfig;

pub const CONFIG_KEY: &str = "_cluster/config.json";
const LEGACY_CONFIG_KEY: &str = "cluster.json";

/// Version-gated read/write of `RuntimeClusterConfig`. Structural writes are expected to come
/// only from the leader; this type itself does not enforce that — callers (`Coordinator`,
/// `Cluster`) check `is_leader()` before calling `save`.
pub struct ConfigStore {
    storage: Arc<dyn StorageAdapter>,
    last_seen_version: AtomicU64,
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage, last_seen_version: AtomicU64::new(0) }
    }

    pub async fn load(&self) -> Result<Option<RuntimeClusterConfig>, ClusterRuntimeError> {
        let config: Option<RuntimeClusterConfig> = self.storage.get_json(CONFIG_KEY).await?;
        if let Some(config) = &config {
            self.last_seen_version.store(config.version, Ordering::SeqCst);
        }
        Ok(config)
    }

    /// Applies `config` only if its version is strictly greater than the last one this reader
    /// observed, per §4.10 ("readers cache the last-seen version").
    pub async fn save(&self, config: RuntimeClusterConfig) -> Result<(), ClusterRuntimeError> {
        let seen = self.last_seen_version.load(Ordering::SeqCst);
        if config.version <= seen && seen != 0 {
            debug!(seen, incoming = config.version, "stale config write ignored");
            return Ok(());
        }
        self.last_seen_version.store(config.version, Ordering::SeqCst);
        self.storage.save_json(CONFIG_KEY, &config).await
    }

    /// Heartbeat/metric writes bypass the version gate entirely (§4.10); the caller is
    /// responsible for only ever touching its own node's fields this way.
    pub async fn save_unversioned(&self, config: &RuntimeClusterConfig) -> Result<(), ClusterRuntimeError> {
        self.storage.save_json(CONFIG_KEY, config).await
    }

    /// Moves a legacy config blob from `cluster.json` into the current layout, without loss,
    /// if the current layout doesn't exist yet.
    pub async fn migrate_legacy(&self) -> Result<bool, ClusterRuntimeError> {
        if self.storage.get_metadata(CONFIG_KEY).await?.is_some() {
            return Ok(false);
        }
        let Some(legacy_bytes) = self.storage.get_metadata(LEGACY_CONFIG_KEY).await? else {
            return Ok(false);
        };
        let legacy_config: RuntimeClusterConfig = serde_json::from_slice(&legacy_bytes)?;
        self.storage.save_json(CONFIG_KEY, &legacy_config).await?;
        warn!("migrated legacy cluster config into current layout");
        Ok(true)
    }
}
