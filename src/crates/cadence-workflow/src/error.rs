//! Workflow errors.

use cadence_agents::AgentError;
use thiserror::Error;

/// Errors from planning and execution.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The plan violates the DAG contract.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Two tasks committed results for the same step id.
    #[error("duplicate step result: {0}")]
    DuplicateStepResult(String),

    /// The executor looped past the round cap without finishing the plan.
    #[error("plan stuck after {rounds} rounds")]
    PlanStuck { rounds: u32 },

    /// A template failed to load or parse.
    #[error("template error: {0}")]
    Template(String),

    /// A step referenced a worker missing from the catalog.
    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Checkpoint(#[from] cadence_checkpoint::CheckpointError),

    #[error(transparent)]
    Core(#[from] cadence_core::CoreError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

impl WorkflowError {
    /// Whether the error is the caller's own cancellation or deadline.
    pub fn is_cancellation(&self) -> bool {
        match self {
            WorkflowError::Agent(err) => err.is_cancellation(),
            WorkflowError::Core(err) => err.is_cancellation(),
            _ => false,
        }
    }
}
