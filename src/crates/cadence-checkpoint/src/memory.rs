//! In-memory checkpoint backend.
//!
//! Reference implementation of [`CheckpointStore`] used in tests and
//! single-process deployments. A single `RwLock` over the thread map gives
//! readers a consistent snapshot and serializes writers per key; production
//! deployments substitute a relational backend behind the same trait.

use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, PendingWrite,
};
use crate::error::{CheckpointError, Result};
use crate::store::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    writes: Vec<PendingWrite>,
}

type ThreadKey = (String, String); // (thread_id, checkpoint_ns)

/// In-memory [`CheckpointStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: Arc<RwLock<HashMap<ThreadKey, Vec<Entry>>>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `(thread, namespace)` keys tracked.
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total checkpoints across all threads.
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Drop everything. Test helper.
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    fn key(config: &CheckpointConfig) -> Result<ThreadKey> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".into()));
        }
        Ok((config.thread_id.clone(), config.checkpoint_ns.clone()))
    }

    fn tuple_for(key: &ThreadKey, entry: &Entry) -> CheckpointTuple {
        let config = CheckpointConfig {
            thread_id: key.0.clone(),
            checkpoint_ns: key.1.clone(),
            checkpoint_id: Some(entry.checkpoint.id.clone()),
        };
        let parent_config = entry.checkpoint.parent_id.as_ref().map(|parent| {
            CheckpointConfig {
                thread_id: key.0.clone(),
                checkpoint_ns: key.1.clone(),
                checkpoint_id: Some(parent.clone()),
            }
        });
        CheckpointTuple {
            config,
            checkpoint: entry.checkpoint.clone(),
            metadata: entry.metadata.clone(),
            parent_config,
            pending_writes: entry.writes.clone(),
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointConfig> {
        let key = Self::key(config)?;
        let mut storage = self.storage.write().await;
        let entries = storage.entry(key.clone()).or_default();

        if entries.iter().any(|e| e.checkpoint.id == checkpoint.id) {
            return Err(CheckpointError::AlreadyExists(checkpoint.id));
        }

        let stored = CheckpointConfig {
            thread_id: key.0,
            checkpoint_ns: key.1,
            checkpoint_id: Some(checkpoint.id.clone()),
        };
        entries.push(Entry {
            checkpoint,
            metadata,
            writes,
        });
        Ok(stored)
    }

    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let key = Self::key(config)?;
        let storage = self.storage.read().await;
        let Some(entries) = storage.get(&key) else {
            return Ok(None);
        };

        let entry = match &config.checkpoint_id {
            Some(id) => entries.iter().find(|e| &e.checkpoint.id == id),
            None => entries.last(),
        };
        Ok(entry.map(|e| Self::tuple_for(&key, e)))
    }

    async fn list(&self, thread_id: &str, ns: &str) -> Result<Vec<CheckpointTuple>> {
        let key = (thread_id.to_string(), ns.to_string());
        let storage = self.storage.read().await;
        Ok(storage
            .get(&key)
            .map(|entries| entries.iter().map(|e| Self::tuple_for(&key, e)).collect())
            .unwrap_or_default())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.retain(|(thread, _), _| thread != thread_id);
        Ok(())
    }
}
