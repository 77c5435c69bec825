//! Distributed query planning and scatter-gather execution (§4.9, C9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coordinator::Coordinator;
use crate::legacy::{NodeId, ShardId};
use crate::shard_manager::ShardManager;
use crate::transport::Transport;
use crate::types::{ClusterQuery, QueryKind, QueryPlan, QueryStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub returned: usize,
    pub elapsed_ms: u64,
    pub errors: Option<String>,
    pub shards: Vec<ShardId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub results: Vec<serde_json::Value>,
    pub total_count: usize,
    pub execution_time_ms: u64,
    pub node_stats: HashMap<NodeId, NodeStats>,
}

/// Produces and executes a [`QueryPlan`] against the shard topology. `local_executor` runs a
/// query against the shards this node hosts directly; remote shard groups go over
/// [`Transport`]'s `query` RPC.
pub struct QueryPlanner {
    node_id: NodeId,
    transport: Arc<Transport>,
    shard_manager: Arc<ShardManager>,
    coordinator: Arc<Coordinator>,
}

impl QueryPlanner {
    pub fn new(node_id: NodeId, transport: Arc<Transport>, shard_manager: Arc<ShardManager>, coordinator: Arc<Coordinator>) -> Self {
        Self { node_id, transport, shard_manager, coordinator }
    }

    pub fn classify(&self, query: &ClusterQuery) -> QueryKind {
        query.classify()
    }

    /// Determines affected shards: entity key ⇒ single shard; partition hint ⇒ that shard;
    /// else ⇒ every shard (broadcast).
    fn affected_shards(&self, query: &ClusterQuery) -> Vec<ShardId> {
        if let Some(key) = &query.entity_key {
            return vec![self.shard_manager.shard_id_for_key(key)];
        }
        if let Some(hints) = &query.shard_hints {
            return hints.clone();
        }
        if let Some(hint) = query.partition_hint {
            return vec![hint];
        }
        (0..self.shard_manager.shard_count()).map(ShardId).collect()
    }

    /// Strategy selection by affected-shard count `S` vs total `T`, plus a +20 network-cost
    /// penalty per shard whose primary isn't this node.
    pub fn plan(&self, query: &ClusterQuery) -> QueryPlan {
        let shards = self.affected_shards(query);
        let total = self.shard_manager.shard_count();
        let s = shards.len() as u64;

        let (strategy, mut cost) = if s == 0 {
            (QueryStrategy::LocalOnly, 1)
        } else if s == total as u64 {
            (QueryStrategy::Broadcast, 1000)
        } else if s <= 3 {
            (QueryStrategy::Targeted, 10 * s)
        } else {
            (QueryStrategy::ScatterGather, 50 * s)
        };

        let mut node_assignments = HashMap::new();
        for shard in &shards {
            let assignment = self.shard_manager.get_nodes_for_shard(*shard);
            let nodes = match assignment {
                Ok(a) => {
                    if a.primary != self.node_id {
                        cost += 20;
                    }
                    a.node_ids()
                }
                Err(_) => vec![],
            };
            node_assignments.insert(*shard, nodes);
        }

        QueryPlan { shards, node_assignments, parallel: true, cost, strategy }
    }

    /// Reorders per-shard candidate nodes to prefer healthier ones, using the coordinator's
    /// health view as the proxy for "healthier" (a live, non-stale leader/follower).
    pub fn optimize(&self, mut plan: QueryPlan) -> QueryPlan {
        let healthy_leader = self.coordinator.leader();
        for nodes in plan.node_assignments.values_mut() {
            nodes.sort_by_key(|n| if Some(n) == healthy_leader.as_ref() { 0 } else { 1 });
        }
        plan
    }

    /// Groups affected shards by target node, executes local and remote groups in parallel,
    /// and merges with resilient fan-in (per-node failures become `NodeStats.errors`, never a
    /// whole-query failure).
    pub async fn execute<F, Fut>(&self, query: ClusterQuery, local_executor: F) -> QueryResult
    where
        F: Fn(Vec<ShardId>) -> Fut,
        Fut: std::future::Future<Output = Vec<serde_json::Value>>,
    {
        let started = Instant::now();
        let plan = self.optimize(self.plan(&query));

        let mut groups: HashMap<NodeId, Vec<ShardId>> = HashMap::new();
        for (shard, nodes) in &plan.node_assignments {
            let target = nodes.first().cloned().unwrap_or_else(|| self.node_id.clone());
            groups.entry(target).or_default().push(*shard);
        }

        let mut node_stats = HashMap::new();
        let mut all_results = Vec::new();

        for (node, shards) in groups {
            let group_started = Instant::now();
            if node == self.node_id {
                let results = local_executor(shards.clone()).await;
                node_stats.insert(
                    node,
                    NodeStats { returned: results.len(), elapsed_ms: group_started.elapsed().as_millis() as u64, errors: None, shards },
                );
                all_results.extend(results);
            } else {
                let params = serde_json::json!({ "query": query, "shards": shards });
                match self.transport.call(&node, "query", params).await {
                    Ok(value) => {
                        let results: Vec<serde_json::Value> = value.get("results").and_then(|r| r.as_array()).cloned().unwrap_or_default();
                        node_stats.insert(
                            node,
                            NodeStats { returned: results.len(), elapsed_ms: group_started.elapsed().as_millis() as u64, errors: None, shards },
                        );
                        all_results.extend(results);
                    }
                    Err(err) => {
                        warn!(node = %node.0, error = %err, "remote query group failed");
                        node_stats.insert(
                            node,
                            NodeStats { returned: 0, elapsed_ms: group_started.elapsed().as_millis() as u64, errors: Some(err.to_string()), shards },
                        );
                    }
                }
            }
        }

        let merged = merge_results(all_results);
        QueryResult {
            total_count: merged.len(),
            results: merged,
            execution_time_ms: started.elapsed().as_millis() as u64,
            node_stats,
        }
    }
}

/// Dedup by `id`/`entity.id`/`uuid`; when a score field is present, duplicates average their
/// score and the result is sorted descending. Otherwise, simple last-write-wins dedup.
fn merge_results(results: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
    let mut by_id: HashMap<String, serde_json::Value> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for item in results {
        let Some(id) = result_id(&item) else {
            order.push(uuid::Uuid::new_v4().to_string());
            by_id.insert(order.last().unwrap().clone(), item);
            continue;
        };
        match by_id.get(&id) {
            Some(existing) => {
                let merged = merge_duplicate(existing, &item);
                by_id.insert(id, merged);
            }
            None => {
                order.push(id.clone());
                by_id.insert(id, item);
            }
        }
    }

    let mut merged: Vec<serde_json::Value> = order.into_iter().filter_map(|id| by_id.remove(&id)).collect();
    merged.sort_by(|a, b| {
        let score_a = a.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let score_b = b.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });
    merged
}

fn result_id(item: &serde_json::Value) -> Option<String> {
    for field in ["id", "uuid"] {
        if let Some(v) = item.get(field).and_then(|v| v.as_str()) {
            return Some(v.to_string());
        }
    }
    item.get("entity").and_then(|e| e.get("id")).and_then(|v| v.as_str()).map(str::to_string)
}

fn merge_duplicate(existing: &serde_json::Value, incoming: &serde_json::Value) -> serde_json::Value {
    let existing_score = existing.get("score").and_then(|v| v.as_f64());
    let incoming_score = incoming.get("score").and_then(|v| v.as_f64());
    let mut merged = if existing_score.unwrap_or(0.0) >= incoming_score.unwrap_or(0.0) {
        existing.clone()
    } else {
        incoming.clone()
    };
    if let (Some(a), Some(b)) = (existing_score, incoming_score) {
        if let Some(obj) = merged.as_object_mut() {
            obj.insert("score".to_string(), serde_json::json!((a + b) / 2.0));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn planner(shard_count: u32) -> (QueryPlanner, Arc<ShardManager>) {
        let node_id = NodeId::new("n0");
        let transport = Arc::new(Transport::new(node_id.clone(), Duration::from_secs(5), Duration::from_secs(15)));
        let shard_manager = Arc::new(ShardManager::new(shard_count, 1));
        shard_manager.add_node(&node_id);
        let coordinator = Arc::new(Coordinator::new(node_id.clone(), vec![]));
        coordinator.become_leader_unopposed();
        (QueryPlanner::new(node_id, transport, shard_manager.clone(), coordinator), shard_manager)
    }

    #[test]
    fn entity_key_query_is_targeted_to_a_single_shard() {
        let (planner, _sm) = planner(64);
        let query = ClusterQuery { entity_key: Some("doc-1".into()), ..Default::default() };
        let plan = planner.plan(&query);
        assert_eq!(plan.shards.len(), 1);
        assert_eq!(plan.strategy, QueryStrategy::Targeted);
    }

    #[test]
    fn broadcast_query_covers_every_shard() {
        let (planner, _sm) = planner(8);
        let query = ClusterQuery::default();
        let plan = planner.plan(&query);
        assert_eq!(plan.shards.len(), 8);
        assert_eq!(plan.strategy, QueryStrategy::Broadcast);
        assert_eq!(plan.cost, 1000);
    }

    #[test]
    fn targeted_query_owned_locally_has_no_network_penalty() {
        let (planner, _sm) = planner(16);
        let query = ClusterQuery { entity_key: Some("doc-7".into()), kind: Some(QueryKind::Vector), ..Default::default() };
        let plan = planner.plan(&query);
        assert_eq!(plan.strategy, QueryStrategy::Targeted);
        assert_eq!(plan.cost, 10);
    }

    #[test]
    fn merge_results_averages_duplicate_scores_and_sorts_descending() {
        let results = vec![
            serde_json::json!({"id": "x", "score": 0.8}),
            serde_json::json!({"id": "y", "score": 0.5}),
            serde_json::json!({"id": "x", "score": 0.6}),
        ];
        let merged = merge_results(results);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0]["id"], "x");
        assert!((merged[0]["score"].as_f64().unwrap() - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn execute_runs_local_group_and_merges() {
        let (planner, _sm) = planner(4);
        let query = ClusterQuery { entity_key: Some("doc-1".into()), ..Default::default() };
        let result = planner
            .execute(query, |_shards| async { vec![serde_json::json!({"id": "a", "score": 1.0})] })
            .await;
        assert_eq!(result.total_count, 1);
        assert_eq!(result.node_stats.len(), 1);
    }
}
