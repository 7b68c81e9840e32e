//! Per-request execution context.
//!
//! A [`RunContext`] is an explicit value threaded through every layer of a
//! request: driver, middleware, gateway, tools and workflow tasks. It
//! replaces any ambient or task-local state and carries the caller identity,
//! the cooperative cancellation signal and an optional deadline.

use crate::error::{CoreError, Result};
use crate::signal::CompletionSignal;
use std::time::{Duration, Instant};

/// Identity and control state for one request.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Session (thread) the request belongs to.
    pub session_id: String,

    /// Caller user id, when known.
    pub user_id: Option<String>,

    /// Caller role, used for tool filtering.
    pub user_role: String,

    /// Cooperative cancellation signal; fired by the caller.
    pub cancellation: CompletionSignal,

    /// Absolute deadline for the whole request.
    pub deadline: Option<Instant>,
}

impl RunContext {
    /// Create a context with the default `"user"` role and no deadline.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            user_role: "user".to_string(),
            cancellation: CompletionSignal::new(),
            deadline: None,
        }
    }

    /// Set the user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = role.into();
        self
    }

    /// Set a total budget from now.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    /// Request cancellation of everything running under this context.
    pub fn cancel(&self) {
        self.cancellation.fire();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_fired()
    }

    /// Fail fast if the request was cancelled or ran past its deadline.
    ///
    /// Checked at every suspension point by the driver, gateway and
    /// scheduler.
    pub fn check_live(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CoreError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Time left until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_live_passes_fresh_context() {
        let ctx = RunContext::new("sess-1");
        assert!(ctx.check_live().is_ok());
    }

    #[test]
    fn test_cancel_trips_check_live() {
        let ctx = RunContext::new("sess-1");
        ctx.cancel();
        assert!(matches!(ctx.check_live(), Err(CoreError::Cancelled)));
    }

    #[test]
    fn test_deadline_trips_check_live() {
        let ctx = RunContext::new("sess-1").with_budget(Duration::from_secs(0));
        assert!(matches!(
            ctx.check_live(),
            Err(CoreError::DeadlineExceeded)
        ));
    }

    #[test]
    fn test_clones_share_cancellation() {
        let ctx = RunContext::new("sess-1");
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
    }
}
