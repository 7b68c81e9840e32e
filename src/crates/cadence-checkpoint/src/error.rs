//! Checkpoint store errors.

use thiserror::Error;

/// Errors from checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// A checkpoint with the same id already exists for the thread.
    #[error("checkpoint already exists: {0}")]
    AlreadyExists(String),

    /// Required identifier missing from the config.
    #[error("invalid checkpoint config: {0}")]
    Invalid(String),

    /// The backing store is unreachable. Transient; callers must treat the
    /// pending step as unfinished.
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),

    /// Serialization failure.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

impl CheckpointError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckpointError::Unavailable(_))
    }
}
