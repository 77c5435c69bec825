//! Explicit component wiring (§9 Design Notes: "prefer explicit wiring at construction... over
//! singletons"). `Cluster` owns every component and exposes the operations `barq-api` drives a
//! node through; it never exposes the components themselves as globals.

use std::sync::Arc;

use tracing::info;

use crate::cache_sync::CacheSync;
use crate::config::ClusterRuntimeConfig;
use crate::config_store::ConfigStore;
use crate::coordinator::{AppendEntriesArgs, Coordinator, RequestVoteArgs, RequestVoteReply};
use crate::discovery::{BootstrapOutcome, Discovery};
use crate::error::ClusterRuntimeError;
use crate::legacy::{NodeId, ShardId};
use crate::migrator::{ReceiveMigrationBatchArgs, ShardMigrator, ValidateMigrationArgs};
use crate::partitioner::Partitioner;
use crate::query_planner::QueryPlanner;
use crate::replication::{ReadArgs, ReplicateWriteArgs, ReplicationRegistry, WriteArgs};
use crate::shard_manager::ShardManager;
use crate::storage_adapter::StorageAdapter;
use crate::transport::{BroadcastEvent, Transport};
use crate::types::{Endpoint, NodeInfo};

/// A single running node's coordination engine: every component from C1-C10, wired together
/// the way §9's Design Notes ask for rather than reached via globals.
pub struct Cluster {
    pub node_id: NodeId,
    pub config: ClusterRuntimeConfig,
    pub transport: Arc<Transport>,
    pub config_store: Arc<ConfigStore>,
    pub discovery: Arc<Discovery>,
    pub partitioner: Arc<Partitioner>,
    pub shard_manager: Arc<ShardManager>,
    pub coordinator: Arc<Coordinator>,
    pub migrator: Arc<ShardMigrator>,
    pub cache_sync: Arc<CacheSync>,
    pub query_planner: Arc<QueryPlanner>,
    pub replication: Arc<ReplicationRegistry>,
    /// Cancels every background loop spawned in `bootstrap` (§9: "owned tasks per component with
    /// explicit lifecycles", applied at the `Cluster` level since the loops live here).
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl Cluster {
    /// Starts transport, runs the discovery bootstrap protocol (§4.2), and wires every other
    /// component against the resulting membership.
    pub async fn bootstrap(config: ClusterRuntimeConfig, storage: Arc<dyn StorageAdapter>) -> Result<Self, ClusterRuntimeError> {
        let node_id = NodeId::new(config.node_id.clone());

        let transport = Arc::new(Transport::new(node_id.clone(), config.rpc_timeout(), config.sse_keepalive()));
        let bound_port = transport.start(config.bind_port).await?;

        let config_store = Arc::new(ConfigStore::new(storage.clone()));
        config_store.migrate_legacy().await?;
        let discovery = Arc::new(Discovery::new(config_store.clone(), storage.clone()));

        let endpoint = Endpoint { host: config.bind_host.clone(), port: bound_port, stream_port: None };
        let self_node = NodeInfo::new(node_id.clone(), endpoint);
        let outcome = discovery
            .bootstrap(self_node.clone(), config.shard_count, config.replication_factor)
            .await?;

        let partitioner = Arc::new(Partitioner::new(config.shard_count));
        let shard_manager = Arc::new(ShardManager::with_virtual_nodes(config.shard_count, config.replication_factor, config.virtual_nodes_per_physical));
        shard_manager.add_node(&node_id);

        let known_peers = discovery.known_peers().await?;
        for peer in &known_peers {
            if peer.id != node_id {
                transport.register_endpoint(peer.id.clone(), peer.endpoint.clone());
            }
        }
        let peers: Vec<NodeId> = known_peers.into_iter().map(|p| p.id).filter(|id| id != &node_id).collect();
        let coordinator = Arc::new(Coordinator::new(node_id.clone(), peers.clone()));
        if matches!(outcome, BootstrapOutcome::Initialized) {
            coordinator.become_leader_unopposed();
        }

        let migrator = Arc::new(ShardMigrator::new(
            node_id.clone(),
            transport.clone(),
            coordinator.clone(),
            shard_manager.clone(),
            storage.clone(),
            config.consensus_timeout(),
        ));

        let cache_sync = Arc::new(CacheSync::new(node_id.clone(), transport.clone(), config.cache_sync_batch_size));

        let query_planner = Arc::new(QueryPlanner::new(node_id.clone(), transport.clone(), shard_manager.clone(), coordinator.clone()));

        let replication = Arc::new(ReplicationRegistry::new(node_id.clone(), transport.clone(), cache_sync.clone(), storage.clone(), coordinator.clone()));

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        register_rpc_handlers(&transport, &coordinator, &migrator, &replication);
        spawn_cache_sync_listener(&transport, &cache_sync, shutdown_rx.clone());
        spawn_cache_flush_timer(&cache_sync, config.cache_sync_interval(), shutdown_rx.clone());
        spawn_discovery_loop(discovery.clone(), self_node.clone(), coordinator.clone(), shard_manager.clone(), transport.clone(), config.node_timeout(), config.discovery_loop_interval(), shutdown_rx.clone());
        spawn_election_loop(coordinator.clone(), transport.clone(), config.election_timeout(), shutdown_rx.clone());
        spawn_leader_replication_loop(coordinator.clone(), transport.clone(), config.heartbeat_interval(), shutdown_rx);

        info!(node = %node_id.0, port = bound_port, "cluster bootstrapped");

        Ok(Self {
            node_id,
            config,
            transport,
            config_store,
            discovery,
            partitioner,
            shard_manager,
            coordinator,
            migrator,
            cache_sync,
            query_planner,
            replication,
            shutdown_tx,
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.coordinator.leader().is_some() && self.shard_manager.is_healthy()
    }

    /// Stops the transport and marks self inactive in the discovery registry, clearing the
    /// leader field if this node held it.
    pub async fn shutdown(&self) -> Result<(), ClusterRuntimeError> {
        let _ = self.shutdown_tx.send(true);
        self.discovery.mark_stopped(&self.node_id).await?;
        self.transport.stop().await;
        Ok(())
    }

    /// Bridges the live ring state into the legacy static router's shape, so `barq-api`'s
    /// existing `ClusterRouter` consumers see a consistent view of the dynamic topology.
    pub fn legacy_router_snapshot(&self) -> crate::legacy::ClusterRouter {
        crate::legacy::ClusterRouter::from_ring_snapshot(
            self.node_id.clone(),
            self.shard_manager.snapshot(),
            crate::legacy::ReadPreference::default(),
        )
    }
}

/// Wires the §6 peer-to-peer RPC surface onto the transport's typed handler dispatcher — one
/// method name per Raft/migration RPC, per the Design Notes' "dynamic handler maps" guidance.
fn register_rpc_handlers(transport: &Arc<Transport>, coordinator: &Arc<Coordinator>, migrator: &Arc<ShardMigrator>, replication: &Arc<ReplicationRegistry>) {
    let c = coordinator.clone();
    transport.register_handler(
        "requestVote",
        Arc::new(move |params, _from| {
            let c = c.clone();
            Box::pin(async move {
                let args: RequestVoteArgs = serde_json::from_value(params)
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                let reply = c.handle_request_vote(args);
                Ok(serde_json::to_value(reply).unwrap())
            })
        }),
    );

    let c = coordinator.clone();
    transport.register_handler(
        "appendEntries",
        Arc::new(move |params, _from| {
            let c = c.clone();
            Box::pin(async move {
                let args: AppendEntriesArgs = serde_json::from_value(params)
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                let reply = c.handle_append_entries(args);
                Ok(serde_json::to_value(reply).unwrap())
            })
        }),
    );

    let m = migrator.clone();
    transport.register_handler(
        "receiveMigrationBatch",
        Arc::new(move |params, _from| {
            let m = m.clone();
            Box::pin(async move {
                let args: ReceiveMigrationBatchArgs = serde_json::from_value(params)
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                m.handle_receive_batch(args)
                    .await
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))
            })
        }),
    );

    let m = migrator.clone();
    transport.register_handler(
        "validateMigration",
        Arc::new(move |params, _from| {
            let m = m.clone();
            Box::pin(async move {
                let args: ValidateMigrationArgs = serde_json::from_value(params)
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                let reply = m
                    .handle_validate(args)
                    .await
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                Ok(serde_json::to_value(reply).unwrap())
            })
        }),
    );

    let r = replication.clone();
    transport.register_handler(
        "write",
        Arc::new(move |params, _from| {
            let r = r.clone();
            Box::pin(async move {
                let args: WriteArgs = serde_json::from_value(params)
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                let shard = ShardId::parse_label(&args.shard)
                    .ok_or_else(|| crate::error::TransportError::ParseError(format!("bad shard label {}", args.shard)))?;
                let repl = r.get_or_create(shard);
                let op = repl
                    .write(args.kind, args.payload, &[])
                    .await
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                Ok(serde_json::to_value(op).unwrap())
            })
        }),
    );

    let r = replication.clone();
    transport.register_handler(
        "read",
        Arc::new(move |params, _from| {
            let r = r.clone();
            Box::pin(async move {
                let args: ReadArgs = serde_json::from_value(params)
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                let shard = ShardId::parse_label(&args.shard)
                    .ok_or_else(|| crate::error::TransportError::ParseError(format!("bad shard label {}", args.shard)))?;
                let repl = r.get_or_create(shard);
                let value = repl
                    .local_read(&args.key)
                    .await
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                Ok(serde_json::json!({ "value": value }))
            })
        }),
    );

    let r = replication.clone();
    transport.register_handler(
        "getUpdates",
        Arc::new(move |params, _from| {
            let r = r.clone();
            Box::pin(async move {
                let args: crate::replication::GetUpdatesArgs = serde_json::from_value(params)
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                let shard = ShardId::parse_label(&args.shard)
                    .ok_or_else(|| crate::error::TransportError::ParseError(format!("bad shard label {}", args.shard)))?;
                let repl = r.get_or_create(shard);
                Ok(serde_json::to_value(repl.updates_since(args.from_sequence)).unwrap())
            })
        }),
    );

    let r = replication.clone();
    transport.register_handler(
        "replicateWrite",
        Arc::new(move |params, _from| {
            let r = r.clone();
            Box::pin(async move {
                let args: ReplicateWriteArgs = serde_json::from_value(params)
                    .map_err(|e| crate::error::TransportError::ParseError(e.to_string()))?;
                let shard = ShardId::parse_label(&args.shard)
                    .ok_or_else(|| crate::error::TransportError::ParseError(format!("bad shard label {}", args.shard)))?;
                r.get_or_create(shard).apply_operation(args.op).await;
                Ok(serde_json::Value::Null)
            })
        }),
    );
}

/// Subscribes to the transport's broadcast stream in-process and feeds `cacheSync` events into
/// `CacheSync::apply_inbound`, since sync messages travel over the SSE channel, not RPC.
fn spawn_cache_sync_listener(transport: &Arc<Transport>, cache_sync: &Arc<CacheSync>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut receiver = transport.subscribe();
    let cache_sync = cache_sync.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = receiver.recv() => match message {
                    Ok(BroadcastEvent::Custom { event, data }) if event == "cacheSync" => {
                        if let Ok(message) = serde_json::from_value(data) {
                            cache_sync.apply_inbound(message);
                        }
                    }
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

fn spawn_cache_flush_timer(cache_sync: &Arc<CacheSync>, interval: std::time::Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let cache_sync = cache_sync.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => cache_sync.flush(),
            }
        }
    });
}

/// §4.2 discovery loop: heartbeats self, removes stale peers from the coordinator's voter set,
/// and folds newly observed peers in, every `loop_interval`.
fn spawn_discovery_loop(discovery: Arc<Discovery>, mut self_node: NodeInfo, coordinator: Arc<Coordinator>, shard_manager: Arc<ShardManager>, transport: Arc<Transport>, node_timeout: std::time::Duration, loop_interval: std::time::Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(loop_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = discovery.heartbeat(&mut self_node).await {
                tracing::warn!(error = %err, "discovery heartbeat failed");
                continue;
            }
            let peers = match discovery.known_peers().await {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to load known peers");
                    continue;
                }
            };
            let dead = Discovery::dead_peers(&peers, chrono::Duration::from_std(node_timeout).unwrap_or(chrono::Duration::zero()));
            let mut live = Vec::with_capacity(peers.len());
            for peer in peers {
                if peer.id == self_node.id || dead.contains(&peer.id) {
                    continue;
                }
                transport.register_endpoint(peer.id.clone(), peer.endpoint.clone());
                live.push(peer.id);
            }
            // Keep the shard ring's membership in lockstep with the Raft peer set: a node
            // that's live rejoins the ring (no-op if already present), a node that dropped out
            // of the heartbeat window is evicted from it.
            for dead_id in &dead {
                shard_manager.remove_node(dead_id);
            }
            for live_id in &live {
                shard_manager.add_node(live_id);
            }
            coordinator.set_peers(live);
        }
    });
}

/// §4.5 election loop: a follower that hasn't heard from a leader within a randomized
/// `[T, 2T)` window starts an election and solicits votes from every known peer.
fn spawn_election_loop(coordinator: Arc<Coordinator>, transport: Arc<Transport>, election_timeout: std::time::Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = coordinator.wait_for_election_timeout(election_timeout) => {}
            }
            if coordinator.is_leader() {
                continue;
            }
            if coordinator.time_since_heartbeat() < election_timeout {
                continue;
            }
            let peers = coordinator.peers();
            if peers.is_empty() {
                coordinator.become_leader_unopposed();
                continue;
            }

            let args = coordinator.start_election();
            let mut votes_granted = 1usize;
            let mut highest_observed_term = args.term;
            for peer in &peers {
                let params = serde_json::json!(args);
                match transport.call(peer, "requestVote", params).await {
                    Ok(value) => {
                        if let Ok(reply) = serde_json::from_value::<RequestVoteReply>(value) {
                            highest_observed_term = highest_observed_term.max(reply.term);
                            if reply.vote_granted {
                                votes_granted += 1;
                            }
                        }
                    }
                    Err(err) => tracing::debug!(peer = %peer.0, error = %err, "requestVote failed"),
                }
            }
            coordinator.conclude_election(args.term, votes_granted, peers.len() + 1, highest_observed_term);
        }
    });
}

/// §4.5 leader replication loop: periodically ships the full log suffix to every peer and
/// advances the commit index once a majority of match indexes agree.
fn spawn_leader_replication_loop(coordinator: Arc<Coordinator>, transport: Arc<Transport>, heartbeat_interval: std::time::Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if !coordinator.is_leader() {
                continue;
            }
            let peers = coordinator.peers();
            let term = coordinator.current_term();
            let leader_commit = coordinator.commit_index();
            let entries = coordinator.entries_from(0);

            if peers.is_empty() {
                coordinator.advance_commit_index(vec![]);
                continue;
            }

            let mut match_indexes = Vec::with_capacity(peers.len());
            for peer in &peers {
                let args = AppendEntriesArgs {
                    term,
                    leader: coordinator.node_id().clone(),
                    prev_log_index: 0,
                    prev_log_term: 0,
                    entries: entries.clone(),
                    leader_commit,
                };
                let params = serde_json::json!(args);
                match transport.call(peer, "appendEntries", params).await {
                    Ok(value) => {
                        if let Ok(reply) = serde_json::from_value::<crate::coordinator::AppendEntriesReply>(value) {
                            if reply.success {
                                match_indexes.push(reply.match_index);
                            }
                        }
                    }
                    Err(err) => tracing::debug!(peer = %peer.0, error = %err, "appendEntries failed"),
                }
            }
            coordinator.advance_commit_index(match_indexes);
        }
    });
}
