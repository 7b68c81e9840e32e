//! Durable per-session state persistence.
//!
//! Agent state is checkpointed at every cycle boundary under a
//! `(thread_id, namespace)` key. The sequence for one key is strictly
//! growing; each checkpoint points at its parent, and the latest entry is
//! the resume point. The [`CheckpointStore`] trait is the backend seam;
//! [`InMemoryCheckpointStore`] is the bundled implementation.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod store;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointTuple,
    PendingWrite,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use store::CheckpointStore;
