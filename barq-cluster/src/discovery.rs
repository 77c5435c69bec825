//! Storage-backed peer discovery (§4.2, C2): bootstraps membership without an external
//! coordination service by reading and writing the same storage the data plane uses.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config_store::ConfigStore;
use crate::error::ClusterRuntimeError;
use crate::legacy::NodeId;
use crate::storage_adapter::StorageAdapter;
use crate::types::{Endpoint, NodeInfo, RuntimeClusterConfig};

pub const REGISTRY_KEY: &str = "_cluster/registry.json";

fn node_key(node_id: &NodeId) -> String {
    format!("_cluster/nodes/{}.json", node_id.0)
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct Registry {
    pub nodes: Vec<NodeId>,
    pub updated: chrono::DateTime<Utc>,
}

/// Result of running the bootstrap protocol once: either this node became the first member of
/// a brand new cluster, or it joined an existing one.
pub enum BootstrapOutcome {
    Initialized,
    Joined,
}

pub struct Discovery {
    config_store: Arc<ConfigStore>,
    storage: Arc<dyn StorageAdapter>,
}

impl Discovery {
    pub fn new(config_store: Arc<ConfigStore>, storage: Arc<dyn StorageAdapter>) -> Self {
        Self { config_store, storage }
    }

    /// §4.2: load `_cluster/config.json`; absent ⇒ initialize a fresh cluster with this node as
    /// leader and every shard assigned to it; present ⇒ join, deciding role from the recorded
    /// leader's freshness.
    pub async fn bootstrap(
        &self,
        self_node: NodeInfo,
        shard_count: u32,
        replication_factor: u32,
    ) -> Result<BootstrapOutcome, ClusterRuntimeError> {
        match self.config_store.load().await? {
            None => {
                let config = RuntimeClusterConfig::bootstrap(self_node.clone(), shard_count, replication_factor);
                self.config_store.save(config).await?;
                self.register_self(&self_node).await?;
                info!(node = %self_node.id.0, "initialized new cluster");
                Ok(BootstrapOutcome::Initialized)
            }
            Some(mut config) => {
                config.nodes.insert(self_node.id.clone(), self_node.clone());
                config.version += 1;
                config.updated_at = Utc::now();
                self.config_store.save(config).await?;
                self.register_self(&self_node).await?;
                info!(node = %self_node.id.0, "joined existing cluster");
                Ok(BootstrapOutcome::Joined)
            }
        }
    }

    async fn register_self(&self, node: &NodeInfo) -> Result<(), ClusterRuntimeError> {
        self.storage.save_json(&node_key(&node.id), node).await?;
        let mut registry: Registry = self.storage.get_json(REGISTRY_KEY).await?.unwrap_or_default();
        if !registry.nodes.contains(&node.id) {
            registry.nodes.push(node.id.clone());
        }
        registry.updated = Utc::now();
        self.storage.save_json(REGISTRY_KEY, &registry).await
    }

    /// §4.2 heartbeat: rewrite own node record with a fresh `lastSeen`.
    pub async fn heartbeat(&self, node: &mut NodeInfo) -> Result<(), ClusterRuntimeError> {
        node.touch();
        self.storage.save_json(&node_key(&node.id), node).await
    }

    /// Loads every peer in the registry, used by the discovery loop to detect new/lost peers.
    pub async fn known_peers(&self) -> Result<Vec<NodeInfo>, ClusterRuntimeError> {
        let registry: Registry = self.storage.get_json(REGISTRY_KEY).await?.unwrap_or_default();
        let mut peers = Vec::with_capacity(registry.nodes.len());
        for node_id in &registry.nodes {
            if let Some(info) = self.storage.get_json::<NodeInfo>(&node_key(node_id)).await? {
                peers.push(info);
            }
        }
        Ok(peers)
    }

    /// Peers whose `lastSeen` is older than `node_timeout` are eligible for removal (§4.2).
    pub fn dead_peers(peers: &[NodeInfo], node_timeout: chrono::Duration) -> Vec<NodeId> {
        peers
            .iter()
            .filter(|p| p.is_stale(node_timeout))
            .map(|p| p.id.clone())
            .collect()
    }

    /// `stop()`: mark self inactive, and if self was leader, clear the leader field so the next
    /// election proceeds cleanly.
    pub async fn mark_stopped(&self, self_id: &NodeId) -> Result<(), ClusterRuntimeError> {
        if let Some(mut config) = self.config_store.load().await? {
            if let Some(info) = config.nodes.get_mut(self_id) {
                info.liveness = crate::types::Liveness::Inactive;
            }
            if config.leader.as_ref() == Some(self_id) {
                config.leader = None;
            }
            config.version += 1;
            config.updated_at = Utc::now();
            self.config_store.save(config).await?;
        }
        warn!(node = %self_id.0, "marked stopped in discovery registry");
        Ok(())
    }
}

pub fn endpoint_for(host: impl Into<String>, port: u16, stream_port: Option<u16>) -> Endpoint {
    Endpoint { host: host.into(), port, stream_port }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_adapter::MemoryStorageAdapter;
    use crate::types::NodeInfo;

    fn node(id: &str) -> NodeInfo {
        NodeInfo::new(NodeId::new(id), endpoint_for("127.0.0.1", 7700, None))
    }

    #[tokio::test]
    async fn absent_config_initializes_fresh_cluster() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::new());
        let config_store = Arc::new(ConfigStore::new(storage.clone()));
        let discovery = Discovery::new(config_store.clone(), storage);

        let outcome = discovery.bootstrap(node("n0"), 4, 1).await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Initialized));
        let config = config_store.load().await.unwrap().unwrap();
        assert_eq!(config.leader, Some(NodeId::new("n0")));
        assert_eq!(config.shard_count, 4);
    }

    #[tokio::test]
    async fn present_config_adds_new_member() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::new());
        let config_store = Arc::new(ConfigStore::new(storage.clone()));
        let discovery = Discovery::new(config_store.clone(), storage);

        discovery.bootstrap(node("n0"), 4, 1).await.unwrap();
        let outcome = discovery.bootstrap(node("n1"), 4, 1).await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Joined));

        let peers = discovery.known_peers().await.unwrap();
        assert_eq!(peers.len(), 2);
    }

    #[tokio::test]
    async fn stale_peer_is_detected_as_dead() {
        let mut stale = node("n1");
        stale.last_seen = Utc::now() - chrono::Duration::seconds(60);
        let dead = Discovery::dead_peers(&[stale], chrono::Duration::seconds(30));
        assert_eq!(dead, vec![NodeId::new("n1")]);
    }

    #[tokio::test]
    async fn mark_stopped_clears_leader_field() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::new());
        let config_store = Arc::new(ConfigStore::new(storage.clone()));
        let discovery = Discovery::new(config_store.clone(), storage);
        discovery.bootstrap(node("n0"), 4, 1).await.unwrap();

        discovery.mark_stopped(&NodeId::new("n0")).await.unwrap();
        let config = config_store.load().await.unwrap().unwrap();
        assert_eq!(config.leader, None);
    }
}
