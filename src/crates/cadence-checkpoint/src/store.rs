//! Storage trait for checkpoint backends.
//!
//! [`CheckpointStore`] is the persistence seam of the runtime: the driver
//! and workflow scheduler write one checkpoint per cycle through it and load
//! the latest on resume. Backends map the operations onto a relational
//! store, a KV store or memory; the core depends only on this trait.
//!
//! Implementations must be `Send + Sync`, must serialize writes per
//! `(thread_id, checkpoint_ns)` pair, and must make a checkpoint and its
//! pending writes visible atomically: readers observe both or neither.

use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, PendingWrite,
};
use crate::error::Result;
use async_trait::async_trait;

/// A checkpoint persistence backend.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically insert a checkpoint and its channel writes.
    ///
    /// Fails with `AlreadyExists` when the checkpoint id collides within the
    /// thread and namespace, which also serializes concurrent writers racing
    /// on the same resume point.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointConfig>;

    /// Fetch the checkpoint addressed by `config`; latest when no id is set.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// Most recent checkpoint for `(thread_id, ns)`.
    async fn get_latest(&self, thread_id: &str, ns: &str) -> Result<Option<CheckpointTuple>> {
        let config = CheckpointConfig::new(thread_id).with_namespace(ns);
        self.get_tuple(&config).await
    }

    /// All checkpoints for `(thread_id, ns)` in insertion order.
    async fn list(&self, thread_id: &str, ns: &str) -> Result<Vec<CheckpointTuple>>;

    /// Remove every checkpoint and write for a thread, across namespaces.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
