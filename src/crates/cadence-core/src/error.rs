//! Error types shared across the core crates.

use thiserror::Error;

/// Errors produced by the core types (tool registry, validation, context).
#[derive(Debug, Error)]
pub enum CoreError {
    /// No tool registered under the requested name.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The caller's role does not grant access to the tool.
    #[error("forbidden: role '{role}' cannot use tool '{tool}'")]
    Forbidden { tool: String, role: String },

    /// Tool arguments failed schema validation.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Tool execution failed.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// Configuration is malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// The per-request deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Whether the error reflects a caller-side cancellation rather than a
    /// fault in the core.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CoreError::Cancelled | CoreError::DeadlineExceeded)
    }
}
