//! Consistent-hash ring over nodes and the derived shard→node assignment tables (§4.4, C4).

use std::collections::HashMap;
use std::hash::{BuildHasher, BuildHasherDefault, Hasher};
use std::sync::RwLock;

use tracing::info;

use crate::error::ShardingError;
use crate::legacy::{NodeId, ShardId};
use crate::types::{ShardAssignment, ShardRecord, ShardStatus};

const DEFAULT_VIRTUAL_NODES: u32 = 150;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct RingPoint {
    hash: u32,
}

struct RingState {
    /// Sorted by hash; kept sorted on every mutation so lookups are a binary search.
    points: Vec<(u32, NodeId)>,
    virtual_nodes: HashMap<NodeId, u32>,
}

impl RingState {
    fn new() -> Self {
        Self { points: Vec::new(), virtual_nodes: HashMap::new() }
    }
}

fn hash32(input: &str) -> u32 {
    let mut hasher = BuildHasherDefault::<ahash::AHasher>::default().build_hasher();
    hasher.write(input.as_bytes());
    (hasher.finish() & 0xffff_ffff) as u32
}

/// Consistent-hash ring plus the materialized `shards`/`nodeToShards` tables.
pub struct ShardManager {
    shard_count: u32,
    replication_factor: u32,
    virtual_nodes_per_node: u32,
    ring: RwLock<RingState>,
    shards: RwLock<HashMap<ShardId, ShardRecord>>,
}

impl ShardManager {
    pub fn new(shard_count: u32, replication_factor: u32) -> Self {
        Self::with_virtual_nodes(shard_count, replication_factor, DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes(shard_count: u32, replication_factor: u32, virtual_nodes_per_node: u32) -> Self {
        let mut shards = HashMap::new();
        for i in 0..shard_count {
            shards.insert(ShardId(i), ShardRecord::new(ShardId(i)));
        }
        Self {
            shard_count,
            replication_factor: replication_factor.max(1),
            virtual_nodes_per_node,
            ring: RwLock::new(RingState::new()),
            shards: RwLock::new(shards),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Inserts `virtual_nodes_per_node` points for this node, then rebalances.
    pub fn add_node(&self, node_id: &NodeId) {
        {
            let mut ring = self.ring.write().unwrap();
            if ring.virtual_nodes.contains_key(node_id) {
                return;
            }
            for i in 0..self.virtual_nodes_per_node {
                let hash = hash32(&format!("{}:{}", node_id.0, i));
                ring.points.push((hash, node_id.clone()));
            }
            ring.points.sort_by_key(|(hash, _)| *hash);
            ring.virtual_nodes.insert(node_id.clone(), self.virtual_nodes_per_node);
        }
        self.rebalance();
        info!(node = %node_id.0, "node added to shard ring");
    }

    /// Removes every virtual point owned by the node, marks its primary shards `rebalancing`,
    /// then rebalances.
    pub fn remove_node(&self, node_id: &NodeId) {
        {
            let mut ring = self.ring.write().unwrap();
            ring.points.retain(|(_, owner)| owner != node_id);
            ring.virtual_nodes.remove(node_id);
        }
        {
            let mut shards = self.shards.write().unwrap();
            for shard in shards.values_mut() {
                if shard.primary.as_ref() == Some(node_id) {
                    shard.status = ShardStatus::Rebalancing;
                }
                shard.replicas.retain(|r| r != node_id);
            }
        }
        self.rebalance();
        info!(node = %node_id.0, "node removed from shard ring");
    }

    fn ring_lookup(&self, hash: u32, ring: &RingState, skip: &[NodeId]) -> Option<NodeId> {
        if ring.points.is_empty() {
            return None;
        }
        let start = ring.points.partition_point(|(h, _)| *h < hash);
        let len = ring.points.len();
        for offset in 0..len {
            let (_, node) = &ring.points[(start + offset) % len];
            if !skip.contains(node) {
                return Some(node.clone());
            }
        }
        None
    }

    /// `shard-NNN` where `NNN = md5(key) mod shardCount`, zero-padded to 3 digits (§4.4).
    pub fn shard_id_for_key(&self, key: &str) -> ShardId {
        let digest = md5::compute(key.as_bytes());
        let as_u32 = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        ShardId(as_u32 % self.shard_count)
    }

    /// `(shardId, primary, replicas)` for a key, per §4.4.
    pub fn get_shard_for_key(&self, key: &str) -> Result<ShardAssignment, ShardingError> {
        let shard_id = self.shard_id_for_key(key);
        self.get_nodes_for_shard(shard_id)
    }

    pub fn get_nodes_for_shard(&self, shard_id: ShardId) -> Result<ShardAssignment, ShardingError> {
        // An explicit override (migration switch) takes precedence over the ring-derived
        // placement until the next rebalance recomputes it.
        if let Some(record) = self.shards.read().unwrap().get(&shard_id) {
            if let Some(primary) = record.primary.clone() {
                return Ok(ShardAssignment { shard: shard_id, primary, replicas: record.replicas.clone() });
            }
        }
        let ring = self.ring.read().unwrap();
        if ring.points.is_empty() {
            return Err(ShardingError::EmptyRing);
        }
        let shard_hash = hash32(&shard_id.label());
        let mut skip = Vec::new();
        let mut collected = Vec::new();
        while collected.len() < self.replication_factor as usize {
            match self.ring_lookup(shard_hash, &ring, &skip) {
                Some(node) => {
                    skip.push(node.clone());
                    collected.push(node);
                }
                None => break,
            }
        }
        let primary = collected
            .first()
            .cloned()
            .ok_or(ShardingError::NoPrimary(shard_id))?;
        let replicas = collected[1..].to_vec();
        Ok(ShardAssignment { shard: shard_id, primary, replicas })
    }

    /// Atomically moves ownership in the shard table (used by `Coordinator` on migration
    /// commit). Does not touch the ring itself — the ring is membership-driven, this is an
    /// explicit override applied on top of it.
    pub fn update_shard_assignment(&self, shard_id: ShardId, new_primary: NodeId, replicas: Vec<NodeId>) {
        let mut shards = self.shards.write().unwrap();
        if let Some(shard) = shards.get_mut(&shard_id) {
            shard.primary = Some(new_primary);
            shard.replicas = replicas;
            shard.status = ShardStatus::Active;
        }
    }

    pub fn needs_rebalancing(&self) -> bool {
        self.shards
            .read()
            .unwrap()
            .values()
            .any(|s| matches!(s.status, ShardStatus::Offline | ShardStatus::Rebalancing))
    }

    /// Recomputes every shard's primary/replicas from the ring; deterministic given the
    /// current member set.
    pub fn rebalance(&self) {
        let ring = self.ring.read().unwrap();
        let mut shards = self.shards.write().unwrap();
        for (shard_id, shard) in shards.iter_mut() {
            let shard_hash = hash32(&shard_id.label());
            let mut skip = Vec::new();
            let mut collected = Vec::new();
            while collected.len() < self.replication_factor as usize {
                match self.ring_lookup(shard_hash, &ring, &skip) {
                    Some(node) => {
                        skip.push(node.clone());
                        collected.push(node);
                    }
                    None => break,
                }
            }
            if collected.is_empty() {
                shard.primary = None;
                shard.replicas.clear();
                shard.status = ShardStatus::Offline;
            } else {
                shard.primary = Some(collected[0].clone());
                shard.replicas = collected[1..].to_vec();
                shard.status = ShardStatus::Active;
            }
        }
    }

    /// Healthy when at least 90% of shards are `active` (§4.4).
    pub fn is_healthy(&self) -> bool {
        let shards = self.shards.read().unwrap();
        if shards.is_empty() {
            return true;
        }
        let active = shards.values().filter(|s| s.status == ShardStatus::Active).count();
        (active as f64) / (shards.len() as f64) >= 0.9
    }

    pub fn snapshot(&self) -> Vec<ShardRecord> {
        self.shards.read().unwrap().values().cloned().collect()
    }

    pub fn shard(&self, shard_id: ShardId) -> Option<ShardRecord> {
        self.shards.read().unwrap().get(&shard_id).cloned()
    }
}

impl ShardId {
    /// `shard-NNN`, zero-padded to 3 digits, as used in storage paths and migration ids.
    pub fn label(&self) -> String {
        format!("shard-{:03}", self.0)
    }

    /// Inverse of [`Self::label`], used by RPC handlers that key on the label string.
    pub fn parse_label(label: &str) -> Option<ShardId> {
        label.strip_prefix("shard-")?.parse::<u32>().ok().map(ShardId)
    }
}
