//! Service-level errors.

use thiserror::Error;

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service was assembled with an unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external tool bridge misbehaved.
    #[error("bridge '{bridge}' error: {reason}")]
    Bridge { bridge: String, reason: String },

    /// Unknown session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Agent(#[from] cadence_agents::AgentError),

    #[error(transparent)]
    Workflow(#[from] cadence_workflow::WorkflowError),

    #[error(transparent)]
    Checkpoint(#[from] cadence_checkpoint::CheckpointError),

    #[error(transparent)]
    Core(#[from] cadence_core::CoreError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
