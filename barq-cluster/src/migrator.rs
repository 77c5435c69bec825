//! Four-phase online shard migration: transfer → validate → switch → cleanup (§4.6, C6).

use std::sync::Arc;
use std::sync::RwLock;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::MigrationError;
use crate::legacy::NodeId;
use crate::shard_manager::ShardManager;
use crate::storage_adapter::{StorageAdapter, StorageAdapterExt};
use crate::transport::Transport;
use crate::types::{LogCommand, MigrationStatus, MigrationTask};

const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveMigrationBatchArgs {
    pub migration_id: Uuid,
    pub shard: String,
    pub items: Vec<serde_json::Value>,
    pub offset: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateMigrationArgs {
    pub migration_id: Uuid,
    pub shard: String,
    pub expected_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateMigrationReply {
    pub valid: bool,
    pub error: Option<String>,
}

fn progress_key(migration_id: Uuid) -> String {
    format!("migration:{migration_id}:progress")
}

fn cleanup_key(shard_label: &str, scheduled_at: chrono::DateTime<Utc>) -> String {
    format!("cleanup:{shard_label}:{}", scheduled_at.timestamp())
}

/// Orchestrates one shard move from `source` to `target`, driving `MigrationTask` through its
/// state machine. Does not own RPC method registration on [`Transport`]; `Cluster` wires that.
pub struct ShardMigrator {
    node_id: NodeId,
    transport: Arc<Transport>,
    coordinator: Arc<Coordinator>,
    shard_manager: Arc<ShardManager>,
    storage: Arc<dyn StorageAdapter>,
    tasks: DashMap<Uuid, RwLock<MigrationTask>>,
    concurrency: Arc<Semaphore>,
    batch_size: usize,
    consensus_timeout: std::time::Duration,
}

impl ShardMigrator {
    pub fn new(
        node_id: NodeId,
        transport: Arc<Transport>,
        coordinator: Arc<Coordinator>,
        shard_manager: Arc<ShardManager>,
        storage: Arc<dyn StorageAdapter>,
        consensus_timeout: std::time::Duration,
    ) -> Self {
        Self {
            node_id,
            transport,
            coordinator,
            shard_manager,
            storage,
            tasks: DashMap::new(),
            concurrency: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            batch_size: DEFAULT_BATCH_SIZE,
            consensus_timeout,
        }
    }

    pub fn task(&self, id: Uuid) -> Option<MigrationTask> {
        self.tasks.get(&id).map(|t| t.read().unwrap().clone())
    }

    /// Drives all four phases to completion or failure. Acquires the concurrency permit first;
    /// overflow callers simply await this future, which models the "queued" behavior.
    pub async fn migrate_shard(
        &self,
        shard: crate::legacy::ShardId,
        source: NodeId,
        target: NodeId,
    ) -> Result<Uuid, MigrationError> {
        let _permit = self
            .concurrency
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MigrationError::Cancelled(Uuid::nil()))?;

        let mut task = MigrationTask::new(shard, source.clone(), target.clone());
        let migration_id = task.id;
        let shard_label = shard.label();
        self.tasks.insert(migration_id, RwLock::new(task.clone()));

        if let Err(err) = self.transfer(&mut task, &shard_label, &target).await {
            self.fail(migration_id, &err.to_string());
            return Err(err);
        }
        self.update(migration_id, |t| *t = task.clone());

        if let Err(err) = self.validate(&mut task, &shard_label, &target).await {
            self.fail(migration_id, &err.to_string());
            return Err(err);
        }
        self.update(migration_id, |t| *t = task.clone());

        if let Err(err) = self.switch(&mut task, &target).await {
            self.fail(migration_id, &err.to_string());
            return Err(err);
        }
        self.update(migration_id, |t| *t = task.clone());

        self.cleanup(&shard_label).await;
        task.complete();
        self.update(migration_id, |t| *t = task.clone());
        info!(%migration_id, shard = %shard_label, "migration completed");
        Ok(migration_id)
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut MigrationTask)) {
        if let Some(entry) = self.tasks.get(&id) {
            f(&mut entry.write().unwrap());
        }
    }

    fn fail(&self, id: Uuid, reason: &str) {
        self.update(id, |t| t.fail(reason));
        warn!(%id, reason, "migration failed");
    }

    /// Phase 1: batch the shard's items to the target via `receiveMigrationBatch`. Progress is
    /// `floor(offset/total * 80)` percent.
    async fn transfer(
        &self,
        task: &mut MigrationTask,
        shard_label: &str,
        target: &NodeId,
    ) -> Result<(), MigrationError> {
        task.status = MigrationStatus::Transferring;
        let total = self.storage.shard_item_count(shard_label).await.map_err(|e| {
            MigrationError::ValidationFailed(task.id, e.to_string())
        })?;
        task.total_items = total;

        let mut cursor = None;
        let mut offset: u64 = 0;
        loop {
            let page = self
                .storage
                .iterate_shard(shard_label, cursor.clone(), self.batch_size)
                .await
                .map_err(|e| MigrationError::ValidationFailed(task.id, e.to_string()))?;
            if page.items.is_empty() && cursor.is_none() {
                break;
            }
            let batch_len = page.items.len() as u64;
            let args = ReceiveMigrationBatchArgs {
                migration_id: task.id,
                shard: shard_label.to_string(),
                items: page.items,
                offset,
                total,
            };
            self.transport
                .call(target, "receiveMigrationBatch", serde_json::to_value(&args).unwrap())
                .await
                .map_err(MigrationError::Transport)?;
            offset += batch_len;
            task.items_transferred = offset;
            task.progress_percent = if total > 0 { ((offset * 80) / total) as u8 } else { 80 };
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Phase 2: ask target to confirm it received `total_items`. Progress 90% on success.
    async fn validate(
        &self,
        task: &mut MigrationTask,
        shard_label: &str,
        target: &NodeId,
    ) -> Result<(), MigrationError> {
        task.status = MigrationStatus::Validating;
        let args = ValidateMigrationArgs {
            migration_id: task.id,
            shard: shard_label.to_string(),
            expected_count: task.total_items,
        };
        let reply = self
            .transport
            .call(target, "validateMigration", serde_json::to_value(&args).unwrap())
            .await
            .map_err(MigrationError::Transport)?;
        let reply: ValidateMigrationReply = serde_json::from_value(reply)
            .map_err(|e| MigrationError::ValidationFailed(task.id, e.to_string()))?;
        if !reply.valid {
            return Err(MigrationError::ValidationFailed(
                task.id,
                reply.error.unwrap_or_else(|| "count mismatch".into()),
            ));
        }
        task.progress_percent = 90;
        Ok(())
    }

    /// Phase 3: propose the migration through consensus, wait up to `consensus_timeout` for
    /// commit, then flip local `ShardManager` ownership. Progress 95%.
    async fn switch(&self, task: &mut MigrationTask, target: &NodeId) -> Result<(), MigrationError> {
        task.status = MigrationStatus::Switching;
        let command = LogCommand::Migration {
            migration_id: task.id,
            shard: task.shard,
            from: task.source.clone(),
            to: target.clone(),
        };
        let entry = self.coordinator.propose_command(command)?;
        let deadline = tokio::time::Instant::now() + self.consensus_timeout;
        loop {
            if self.coordinator.commit_index() >= entry.index {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MigrationError::ConsensusTimeout(task.id));
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        self.shard_manager
            .update_shard_assignment(task.shard, target.clone(), vec![]);
        task.progress_percent = 95;
        Ok(())
    }

    /// Phase 4: schedule deletion one hour out instead of deleting immediately, so a rollback
    /// window exists.
    async fn cleanup(&self, shard_label: &str) {
        let scheduled_at = Utc::now() + ChronoDuration::hours(1);
        let key = cleanup_key(shard_label, scheduled_at);
        let marker = serde_json::json!({ "shard": shard_label, "scheduled_at": scheduled_at });
        if let Err(err) = self.storage.save_json(&key, &marker).await {
            warn!(error = %err, "failed to persist cleanup marker");
        }
    }

    /// User-initiated cancel: marks the task failed and notifies the target.
    pub async fn cancel(&self, migration_id: Uuid, target: &NodeId) -> Result<(), MigrationError> {
        self.fail(migration_id, "cancelled by operator");
        self.transport
            .call(target, "cancelMigration", serde_json::json!({ "migrationId": migration_id }))
            .await
            .map_err(MigrationError::Transport)?;
        Ok(())
    }

    /// Target-side handler for `receiveMigrationBatch`: persists the batch and the running
    /// progress marker the later `validateMigration` call consults.
    pub async fn handle_receive_batch(&self, args: ReceiveMigrationBatchArgs) -> Result<serde_json::Value, MigrationError> {
        let key = format!("_cluster/shards/{}.json", args.shard);
        let mut existing: Vec<serde_json::Value> = self
            .storage
            .get_json(&key)
            .await
            .map_err(|e| MigrationError::ValidationFailed(args.migration_id, e.to_string()))?
            .unwrap_or_default();
        existing.extend(args.items);
        self.storage
            .save_json(&key, &existing)
            .await
            .map_err(|e| MigrationError::ValidationFailed(args.migration_id, e.to_string()))?;
        self.storage
            .save_json(&progress_key(args.migration_id), &(existing.len() as u64))
            .await
            .map_err(|e| MigrationError::ValidationFailed(args.migration_id, e.to_string()))?;
        Ok(serde_json::json!({ "received": existing.len() }))
    }

    /// Target-side handler for `validateMigration`.
    pub async fn handle_validate(&self, args: ValidateMigrationArgs) -> Result<ValidateMigrationReply, MigrationError> {
        let received: u64 = self
            .storage
            .get_json(&progress_key(args.migration_id))
            .await
            .map_err(|e| MigrationError::ValidationFailed(args.migration_id, e.to_string()))?
            .unwrap_or(0);
        if received != args.expected_count {
            return Ok(ValidateMigrationReply {
                valid: false,
                error: Some(format!("expected {}, received {}", args.expected_count, received)),
            });
        }
        Ok(ValidateMigrationReply { valid: true, error: None })
    }

    pub fn active_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| !matches!(t.read().unwrap().status, MigrationStatus::Completed | MigrationStatus::Failed))
            .count()
    }
}
