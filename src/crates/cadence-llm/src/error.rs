//! Gateway error taxonomy.
//!
//! Errors split into transient (retried with ring rotation) and permanent
//! (surfaced immediately). Classification lives on the enum so the gateway
//! and callers agree on what a retry can fix.

use thiserror::Error;

/// Errors from model backends and the gateway.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The per-backend timeout elapsed.
    #[error("model call timed out")]
    Timeout,

    /// The provider throttled the request.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transient provider failure (5xx or equivalent).
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Network-level failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Authentication or authorization failure.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The request was rejected as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider returned something unparseable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Every ring member exhausted its attempts.
    #[error("all backends exhausted after {attempts} calls: {last}")]
    Exhausted { attempts: usize, last: String },

    /// The caller cancelled the request.
    #[error("cancelled")]
    Cancelled,
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, LlmError>;

impl LlmError {
    /// Whether retrying (possibly on another ring member) may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout
                | LlmError::RateLimited(_)
                | LlmError::Upstream(_)
                | LlmError::Connection(_)
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Connection(err.to_string())
        }
    }
}

impl From<cadence_core::CoreError> for LlmError {
    fn from(err: cadence_core::CoreError) -> Self {
        match err {
            cadence_core::CoreError::Cancelled => LlmError::Cancelled,
            cadence_core::CoreError::DeadlineExceeded => LlmError::Timeout,
            other => LlmError::InvalidRequest(other.to_string()),
        }
    }
}
