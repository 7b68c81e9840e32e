//! Checkpoint data structures.
//!
//! A checkpoint is a complete snapshot of a session's channel values at a
//! cycle boundary. Checkpoints for one `(thread_id, namespace)` pair form a
//! parent-pointer tree stored as `(id, parent_id)`; the latest entry is the
//! resume point after a crash or cancellation.
//!
//! # Example
//!
//! ```rust
//! use cadence_checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata};
//! use serde_json::json;
//!
//! let checkpoint = Checkpoint::new([("messages".to_string(), json!([]))].into());
//! let config = CheckpointConfig::new("session-1");
//! let metadata = CheckpointMetadata::loop_step(0);
//! # let _ = (checkpoint, config, metadata);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A pending channel write: `(task_id, channel, value)`.
///
/// Writes produced during the step that concluded with a checkpoint are
/// recorded alongside it; the store must make both durable atomically.
pub type PendingWrite = (String, String, Value);

/// How a checkpoint was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Written when a request's input was merged into state.
    Input,
    /// Written at an agent-cycle or workflow-round boundary.
    Loop,
    /// Written by an out-of-band state update.
    Update,
}

/// Metadata stored next to a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Origin of the checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Step number: -1 for input, then 0, 1, 2 per cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Custom metadata.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    /// Metadata for the input checkpoint of a request.
    pub fn input() -> Self {
        Self {
            source: Some(CheckpointSource::Input),
            step: Some(-1),
            extra: HashMap::new(),
        }
    }

    /// Metadata for a loop step.
    pub fn loop_step(step: i64) -> Self {
        Self {
            source: Some(CheckpointSource::Loop),
            step: Some(step),
            extra: HashMap::new(),
        }
    }

    /// Attach a custom entry.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A state snapshot at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique checkpoint id.
    pub id: String,

    /// Parent checkpoint id, absent for the first checkpoint of a thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Creation timestamp.
    pub ts: DateTime<Utc>,

    /// Snapshot of every channel at checkpoint time.
    pub channel_values: HashMap<String, Value>,
}

impl Checkpoint {
    /// Create a root checkpoint from channel values.
    pub fn new(channel_values: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            ts: Utc::now(),
            channel_values,
        }
    }

    /// Create a child of `parent_id` from channel values.
    pub fn child_of(parent_id: impl Into<String>, channel_values: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: Some(parent_id.into()),
            ts: Utc::now(),
            channel_values,
        }
    }

    /// Fetch one channel's value.
    pub fn channel(&self, name: &str) -> Option<&Value> {
        self.channel_values.get(name)
    }
}

/// Identifies a checkpoint location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Session thread id.
    pub thread_id: String,

    /// Namespace within the thread; empty for the root agent.
    #[serde(default)]
    pub checkpoint_ns: String,

    /// Specific checkpoint id; `None` selects the latest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    /// Config addressing the latest checkpoint of a thread's root namespace.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.checkpoint_ns = ns.into();
        self
    }

    /// Address a specific checkpoint.
    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }
}

/// A checkpoint together with its config, metadata and recorded writes.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    /// Config resolving to exactly this checkpoint.
    pub config: CheckpointConfig,

    /// The snapshot.
    pub checkpoint: Checkpoint,

    /// Metadata.
    pub metadata: CheckpointMetadata,

    /// Config of the parent checkpoint, if any.
    pub parent_config: Option<CheckpointConfig>,

    /// Writes recorded atomically with the checkpoint.
    pub pending_writes: Vec<PendingWrite>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_keeps_parent_pointer() {
        let root = Checkpoint::new(HashMap::new());
        let child = Checkpoint::child_of(root.id.clone(), HashMap::new());
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
    }

    #[test]
    fn test_checkpoint_serialization_roundtrip() {
        let checkpoint = Checkpoint::new(
            [("messages".to_string(), json!([{"role": "human"}]))].into(),
        );
        let json = serde_json::to_string(&checkpoint).unwrap();
        let restored: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, checkpoint.id);
        assert_eq!(restored.channel_values, checkpoint.channel_values);
    }

    #[test]
    fn test_metadata_constructors() {
        assert_eq!(CheckpointMetadata::input().step, Some(-1));
        let m = CheckpointMetadata::loop_step(3).with_extra("round", json!(1));
        assert_eq!(m.source, Some(CheckpointSource::Loop));
        assert_eq!(m.extra["round"], json!(1));
    }
}
