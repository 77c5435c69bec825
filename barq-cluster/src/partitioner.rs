//! Deterministic key → partition mapping (§4.3, C3), independent of cluster membership.

use std::collections::HashMap;
use std::hash::{BuildHasher, BuildHasherDefault, Hasher};

use crate::legacy::NodeId;

/// Pure function `key → partitionId`. The hash algorithm is fixed at cluster initialization
/// and must never change once data has been written, per §4.3.
#[derive(Clone, Debug)]
pub struct Partitioner {
    partition_count: u32,
}

impl Partitioner {
    pub fn new(partition_count: u32) -> Self {
        Self { partition_count: partition_count.max(1) }
    }

    fn hash(key: &str) -> u32 {
        let mut hasher = BuildHasherDefault::<ahash::AHasher>::default().build_hasher();
        hasher.write(key.as_bytes());
        (hasher.finish() & 0xffff_ffff) as u32
    }

    pub fn get_partition(&self, key: &str) -> String {
        let id = Self::hash(key) % self.partition_count;
        format!("partition/{id}")
    }

    pub fn get_partition_index(&self, key: &str) -> u32 {
        Self::hash(key) % self.partition_count
    }

    /// Groups a batch of keys by target partition; round-tripping through this and recombining
    /// yields the same set as calling `get_partition` on each key individually (§8).
    pub fn get_partitions_for_batch(&self, keys: &[String]) -> HashMap<String, Vec<String>> {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for key in keys {
            grouped.entry(self.get_partition(key)).or_default().push(key.clone());
        }
        grouped
    }

    /// Partitions this node "prefers" to collocate writes on; a hint only, never used to
    /// determine correctness of `get_partition`.
    pub fn affinity_partitions(&self, node_id: &NodeId, node_count: u32) -> Vec<String> {
        if node_count == 0 {
            return Vec::new();
        }
        let anchor = Self::hash(&node_id.0) % self.partition_count;
        let stride = (self.partition_count / node_count).max(1);
        let mut partitions = Vec::new();
        let mut index = anchor;
        while (partitions.len() as u32) < self.partition_count.div_ceil(node_count).max(1) {
            partitions.push(format!("partition/{index}"));
            index = (index + stride) % self.partition_count;
            if partitions.len() as u32 >= node_count {
                break;
            }
        }
        partitions
    }
}
