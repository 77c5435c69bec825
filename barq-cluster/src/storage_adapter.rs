//! The `StorageAdapter` capability the coordination engine consumes from the host storage
//! engine (`barq-storage`'s job; this crate only defines the capability boundary — see the
//! Design Notes in the coordination spec on "storage-backed discovery").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ClusterRuntimeError;

/// One page of a shard iteration: the items plus an opaque cursor for the next page, or
/// `None` when iteration is exhausted. `ShardMigrator` drives its transfer loop off this
/// instead of scanning the whole store and filtering by shard.
pub struct ShardPage {
    pub items: Vec<serde_json::Value>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>, ClusterRuntimeError>;
    async fn save_metadata(&self, key: &str, value: &[u8]) -> Result<(), ClusterRuntimeError>;
    async fn list_metadata_keys(&self, prefix: &str) -> Result<Vec<String>, ClusterRuntimeError>;
    async fn get_statistics(&self) -> Result<serde_json::Value, ClusterRuntimeError>;
    async fn save_statistics(&self, value: serde_json::Value) -> Result<(), ClusterRuntimeError>;

    /// Total number of items in a shard, used by `ShardMigrator` Phase 1 to size the transfer.
    async fn shard_item_count(&self, shard_id: &str) -> Result<u64, ClusterRuntimeError>;

    /// Page through a shard's items without scanning the whole store.
    async fn iterate_shard(
        &self,
        shard_id: &str,
        page_cursor: Option<String>,
        page_size: usize,
    ) -> Result<ShardPage, ClusterRuntimeError>;
}

/// Convenience helpers layered on top of the raw byte capability; every adapter gets these
/// for free via serde, mirroring how `barq-storage::Storage` treats its JSON files.
#[async_trait]
pub trait StorageAdapterExt: StorageAdapter {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ClusterRuntimeError> {
        match self.get_metadata(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), ClusterRuntimeError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.save_metadata(key, &bytes).await
    }
}

impl<T: StorageAdapter + ?Sized> StorageAdapterExt for T {}

/// In-memory adapter used by tests and single-process embedding.
#[derive(Default)]
pub struct MemoryStorageAdapter {
    metadata: Mutex<HashMap<String, Vec<u8>>>,
    statistics: Mutex<serde_json::Value>,
    shards: Mutex<HashMap<String, Vec<serde_json::Value>>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self {
            metadata: Mutex::new(HashMap::new()),
            statistics: Mutex::new(serde_json::Value::Null),
            shards: Mutex::new(HashMap::new()),
        }
    }

    /// Test/demo seam: pre-populate a shard's item set.
    pub fn seed_shard(&self, shard_id: impl Into<String>, items: Vec<serde_json::Value>) {
        self.shards.lock().unwrap().insert(shard_id.into(), items);
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>, ClusterRuntimeError> {
        Ok(self.metadata.lock().unwrap().get(key).cloned())
    }

    async fn save_metadata(&self, key: &str, value: &[u8]) -> Result<(), ClusterRuntimeError> {
        self.metadata
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn list_metadata_keys(&self, prefix: &str) -> Result<Vec<String>, ClusterRuntimeError> {
        Ok(self
            .metadata
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_statistics(&self) -> Result<serde_json::Value, ClusterRuntimeError> {
        Ok(self.statistics.lock().unwrap().clone())
    }

    async fn save_statistics(&self, value: serde_json::Value) -> Result<(), ClusterRuntimeError> {
        *self.statistics.lock().unwrap() = value;
        Ok(())
    }

    async fn shard_item_count(&self, shard_id: &str) -> Result<u64, ClusterRuntimeError> {
        Ok(self
            .shards
            .lock()
            .unwrap()
            .get(shard_id)
            .map(|items| items.len() as u64)
            .unwrap_or(0))
    }

    async fn iterate_shard(
        &self,
        shard_id: &str,
        page_cursor: Option<String>,
        page_size: usize,
    ) -> Result<ShardPage, ClusterRuntimeError> {
        let offset: usize = page_cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let shards = self.shards.lock().unwrap();
        let items = match shards.get(shard_id) {
            Some(items) => items,
            None => return Ok(ShardPage { items: vec![], next_cursor: None }),
        };
        let end = (offset + page_size).min(items.len());
        let page: Vec<_> = items[offset..end].to_vec();
        let next_cursor = if end < items.len() { Some(end.to_string()) } else { None };
        Ok(ShardPage { items: page, next_cursor })
    }
}

/// File-backed adapter laying out the `_cluster/...` paths from §6 under a root directory,
/// matching `barq-storage::Storage`'s convention of a directory tree of small JSON files.
pub struct FileStorageAdapter {
    root: PathBuf,
}

impl FileStorageAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ClusterRuntimeError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("_cluster/nodes"))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }
}

/// Metadata keys are used as path fragments; reject traversal and keep the mapping readable.
fn sanitize_key(key: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in key.split('/') {
        match segment {
            "" | "." | ".." => continue,
            other => path.push(other),
        }
    }
    path
}

#[async_trait]
impl StorageAdapter for FileStorageAdapter {
    async fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>, ClusterRuntimeError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_metadata(&self, key: &str, value: &[u8]) -> Result<(), ClusterRuntimeError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, value).await?;
        Ok(())
    }

    async fn list_metadata_keys(&self, prefix: &str) -> Result<Vec<String>, ClusterRuntimeError> {
        let dir = self.path_for(prefix);
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                keys.push(format!("{}/{}", prefix.trim_end_matches('/'), name));
            }
        }
        Ok(keys)
    }

    async fn get_statistics(&self) -> Result<serde_json::Value, ClusterRuntimeError> {
        match self.get_metadata("_cluster/statistics.json").await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(serde_json::Value::Null),
        }
    }

    async fn save_statistics(&self, value: serde_json::Value) -> Result<(), ClusterRuntimeError> {
        let bytes = serde_json::to_vec_pretty(&value)?;
        self.save_metadata("_cluster/statistics.json", &bytes).await
    }

    async fn shard_item_count(&self, shard_id: &str) -> Result<u64, ClusterRuntimeError> {
        let page = self.iterate_shard(shard_id, None, usize::MAX).await?;
        Ok(page.items.len() as u64)
    }

    async fn iterate_shard(
        &self,
        shard_id: &str,
        page_cursor: Option<String>,
        page_size: usize,
    ) -> Result<ShardPage, ClusterRuntimeError> {
        let key = format!("_cluster/shards/{shard_id}.json");
        let items: Vec<serde_json::Value> = match self.get_metadata(&key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        let offset: usize = page_cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (offset + page_size).min(items.len());
        let page = items.get(offset..end).unwrap_or_default().to_vec();
        let next_cursor = if end < items.len() { Some(end.to_string()) } else { None };
        Ok(ShardPage { items: page, next_cursor })
    }
}

/// Ensures a root directory exists before an adapter is constructed over it, used by tests.
pub fn ensure_root(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
