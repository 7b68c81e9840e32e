//! Driver-level errors.

use cadence_checkpoint::CheckpointError;
use cadence_core::CoreError;
use cadence_llm::LlmError;
use thiserror::Error;

/// Errors from the agent loop, router and approval gate.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    /// No approval request registered under the id.
    #[error("approval request not found: {0}")]
    ApprovalNotFound(String),

    /// The caller's session does not own the approval request.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The router was asked for an unregistered worker.
    #[error("worker not found: {0}")]
    WorkerNotFound(String),
}

/// Result alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Whether the error is the caller's own cancellation or deadline.
    pub fn is_cancellation(&self) -> bool {
        match self {
            AgentError::Core(err) => err.is_cancellation(),
            AgentError::Llm(LlmError::Cancelled) => true,
            _ => false,
        }
    }
}
