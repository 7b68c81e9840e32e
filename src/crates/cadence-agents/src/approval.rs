//! Human-in-the-loop approval gate.
//!
//! Sensitive tool calls are intercepted before execution and parked as
//! [`ApprovalRequest`]s. Each pending request owns a [`CompletionSignal`]
//! that fires exactly once on approve, reject or expiry; waiters block on
//! it. Terminal states are absorbing: resolving an already-resolved request
//! returns the current record unchanged.
//!
//! Interception policy: the middleware never blocks the agent loop. It
//! synthesizes an `Approval required, id=...` tool result and returns
//! without invoking the tool. When a later cycle re-emits the same call and
//! an approved, unconsumed record for the identical `(session, tool,
//! arguments)` exists, the call passes through and the record is consumed.

use crate::error::{AgentError, Result};
use crate::middleware::{Middleware, ToolCallNext, ToolCallRequest, ToolOutcome};
use async_trait::async_trait;
use cadence_core::{CompletionSignal, Message};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    /// Whether the state is absorbing.
    pub fn is_terminal(self) -> bool {
        self != ApprovalStatus::Pending
    }
}

/// A parked sensitive action awaiting human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub action_type: String,
    pub action_description: String,
    pub action_data: Value,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub reviewer_comment: Option<String>,
    pub expires_at: DateTime<Utc>,
}

struct GateEntry {
    request: ApprovalRequest,
    signal: CompletionSignal,
    consumed: bool,
}

/// Process-wide registry of approval requests.
pub struct ApprovalGate {
    entries: RwLock<HashMap<String, GateEntry>>,
    default_ttl: Duration,
}

impl ApprovalGate {
    /// Gate with the given default TTL for new requests.
    pub fn new(default_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        })
    }

    /// Insert a pending request with an unresolved signal.
    pub async fn create(
        &self,
        session_id: impl Into<String>,
        user_id: Option<String>,
        action_type: impl Into<String>,
        action_description: impl Into<String>,
        action_data: Value,
        ttl: Option<Duration>,
    ) -> ApprovalRequest {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id,
            action_type: action_type.into(),
            action_description: action_description.into(),
            action_data,
            status: ApprovalStatus::Pending,
            created_at: now,
            resolved_at: None,
            reviewer_comment: None,
            expires_at: now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::hours(1)),
        };
        info!(
            event = "approval_request_created",
            request_id = %request.id,
            session_id = %request.session_id,
            action_type = %request.action_type
        );
        self.entries.write().await.insert(
            request.id.clone(),
            GateEntry {
                request: request.clone(),
                signal: CompletionSignal::new(),
                consumed: false,
            },
        );
        request
    }

    /// Block until the request resolves or the timeout elapses; returns the
    /// current record either way.
    pub async fn wait(
        &self,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ApprovalRequest> {
        let signal = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(request_id)
                .ok_or_else(|| AgentError::ApprovalNotFound(request_id.to_string()))?;
            entry.signal.clone()
        };

        match timeout {
            Some(timeout) => {
                let _ = signal.wait_timeout(timeout).await;
            }
            None => signal.wait().await,
        }

        let entries = self.entries.read().await;
        entries
            .get(request_id)
            .map(|entry| entry.request.clone())
            .ok_or_else(|| AgentError::ApprovalNotFound(request_id.to_string()))
    }

    async fn resolve(
        &self,
        session_id: &str,
        request_id: &str,
        status: ApprovalStatus,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(request_id)
            .ok_or_else(|| AgentError::ApprovalNotFound(request_id.to_string()))?;

        if entry.request.session_id != session_id {
            return Err(AgentError::Forbidden(format!(
                "approval {request_id} belongs to another session"
            )));
        }
        // Idempotent on terminal states.
        if entry.request.status.is_terminal() {
            return Ok(entry.request.clone());
        }

        entry.request.status = status;
        entry.request.resolved_at = Some(Utc::now());
        entry.request.reviewer_comment = comment;
        entry.signal.fire();
        info!(
            event = "approval_request_resolved",
            request_id,
            status = ?status
        );
        Ok(entry.request.clone())
    }

    /// Approve a pending request.
    pub async fn approve(
        &self,
        session_id: &str,
        request_id: &str,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        self.resolve(session_id, request_id, ApprovalStatus::Approved, comment)
            .await
    }

    /// Reject a pending request.
    pub async fn reject(
        &self,
        session_id: &str,
        request_id: &str,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        self.resolve(session_id, request_id, ApprovalStatus::Rejected, comment)
            .await
    }

    /// Transition overdue pending requests to expired, firing their signals.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let mut swept = 0;
        for entry in entries.values_mut() {
            if entry.request.status == ApprovalStatus::Pending && now > entry.request.expires_at {
                entry.request.status = ApprovalStatus::Expired;
                entry.request.resolved_at = Some(now);
                entry.signal.fire();
                swept += 1;
                warn!(event = "approval_request_expired", request_id = %entry.request.id);
            }
        }
        swept
    }

    /// Pending requests, optionally scoped to a session. Sweeps first so
    /// callers never see overdue entries as pending.
    pub async fn list_pending(&self, session_id: Option<&str>) -> Vec<ApprovalRequest> {
        self.sweep_expired().await;
        let entries = self.entries.read().await;
        let mut pending: Vec<ApprovalRequest> = entries
            .values()
            .filter(|entry| entry.request.status == ApprovalStatus::Pending)
            .filter(|entry| session_id.map_or(true, |s| entry.request.session_id == s))
            .map(|entry| entry.request.clone())
            .collect();
        pending.sort_by_key(|request| request.created_at);
        pending
    }

    /// Fetch one record.
    pub async fn get(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.entries
            .read()
            .await
            .get(request_id)
            .map(|entry| entry.request.clone())
    }

    /// Drop resolved records. Garbage collection for long-lived processes.
    pub async fn gc_resolved(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.request.status.is_terminal());
        before - entries.len()
    }

    /// If an approved, unconsumed record for this exact action exists,
    /// consume it and return `true`.
    pub async fn take_approved(&self, session_id: &str, name: &str, arguments: &Value) -> bool {
        let mut entries = self.entries.write().await;
        for entry in entries.values_mut() {
            if entry.request.status == ApprovalStatus::Approved
                && !entry.consumed
                && entry.request.session_id == session_id
                && entry.request.action_data.get("name").and_then(Value::as_str) == Some(name)
                && entry.request.action_data.get("arguments") == Some(arguments)
            {
                entry.consumed = true;
                return true;
            }
        }
        false
    }

    /// Spawn the periodic expiry sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let gate = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                gate.sweep_expired().await;
            }
        })
    }
}

/// Matches tool names against the configured sensitive pattern set.
///
/// Patterns compile as regexes where possible (plain substrings are valid
/// regexes and match anywhere); invalid patterns fall back to substring
/// containment.
#[derive(Clone)]
pub struct SensitiveMatcher {
    regexes: Vec<Regex>,
    substrings: Vec<String>,
}

impl SensitiveMatcher {
    /// Compile a pattern set.
    pub fn new(patterns: &[String]) -> Self {
        let mut regexes = Vec::new();
        let mut substrings = Vec::new();
        for pattern in patterns {
            match Regex::new(pattern) {
                Ok(regex) => regexes.push(regex),
                Err(_) => substrings.push(pattern.clone()),
            }
        }
        Self {
            regexes,
            substrings,
        }
    }

    /// Whether a tool name is sensitive.
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.regexes.iter().any(|regex| regex.is_match(name))
            || self.substrings.iter().any(|s| name.contains(s))
    }
}

/// The approval gate's `wrap_tool_call` implementation.
pub struct ApprovalMiddleware {
    gate: Arc<ApprovalGate>,
    matcher: SensitiveMatcher,
}

impl ApprovalMiddleware {
    /// Middleware over a gate with the given pattern set.
    pub fn new(gate: Arc<ApprovalGate>, patterns: &[String]) -> Self {
        Self {
            gate,
            matcher: SensitiveMatcher::new(patterns),
        }
    }
}

#[async_trait]
impl Middleware for ApprovalMiddleware {
    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: ToolCallNext,
    ) -> Result<ToolOutcome> {
        let tool_sensitive = self.matcher.is_sensitive(&request.call.name);
        if !tool_sensitive {
            return next.run(request).await;
        }

        let session_id = request.ctx.session_id.clone();
        if self
            .gate
            .take_approved(&session_id, &request.call.name, &request.call.arguments)
            .await
        {
            return next.run(request).await;
        }

        let record = self
            .gate
            .create(
                session_id,
                request.ctx.user_id.clone(),
                "tool_execution",
                format!("Execute tool '{}'", request.call.name),
                json!({
                    "name": request.call.name,
                    "arguments": request.call.arguments,
                }),
                None,
            )
            .await;

        Ok(ToolOutcome::Result(Message::tool_result(
            &request.call.id,
            format!(
                "Approval required, id={}. The call to '{}' is awaiting human review; \
                 it will run once approved and re-submitted.",
                record.id, request.call.name
            ),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> Arc<ApprovalGate> {
        ApprovalGate::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_approve_is_idempotent() {
        let gate = gate();
        let req = gate
            .create("s1", None, "test", "desc", json!({}), None)
            .await;

        let first = gate.approve("s1", &req.id, Some("ok".into())).await.unwrap();
        assert_eq!(first.status, ApprovalStatus::Approved);
        assert!(first.resolved_at.is_some());

        let second = gate.approve("s1", &req.id, Some("again".into())).await.unwrap();
        assert_eq!(second.status, ApprovalStatus::Approved);
        assert_eq!(second.reviewer_comment.as_deref(), Some("ok"));
        assert_eq!(second.resolved_at, first.resolved_at);
    }

    #[tokio::test]
    async fn test_reject_after_approve_returns_approved_record() {
        let gate = gate();
        let req = gate
            .create("s1", None, "test", "desc", json!({}), None)
            .await;
        gate.approve("s1", &req.id, None).await.unwrap();

        let record = gate.reject("s1", &req.id, None).await.unwrap();
        assert_eq!(record.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_cross_session_resolution_is_forbidden() {
        let gate = gate();
        let req = gate
            .create("s1", None, "test", "desc", json!({}), None)
            .await;
        let err = gate.approve("other", &req.id, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Forbidden(_)));
        assert_eq!(gate.get(&req.id).await.unwrap().status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_and_fires_signal() {
        let gate = gate();
        let req = gate
            .create("s1", None, "test", "desc", json!({}), Some(Duration::ZERO))
            .await;

        let waiter = {
            let gate = gate.clone();
            let id = req.id.clone();
            tokio::spawn(async move { gate.wait(&id, None).await.unwrap() })
        };

        // The entry is already past its deadline.
        assert_eq!(gate.sweep_expired().await, 1);
        let record = waiter.await.unwrap();
        assert_eq!(record.status, ApprovalStatus::Expired);
        assert!(gate.list_pending(Some("s1")).await.is_empty());
    }

    #[tokio::test]
    async fn test_wait_timeout_returns_pending() {
        let gate = gate();
        let req = gate
            .create("s1", None, "test", "desc", json!({}), None)
            .await;
        let record = gate
            .wait(&req.id, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_take_approved_consumes_once() {
        let gate = gate();
        let args = json!({"id": 5});
        let req = gate
            .create(
                "s1",
                None,
                "tool_execution",
                "desc",
                json!({"name": "delete_record", "arguments": args}),
                None,
            )
            .await;
        gate.approve("s1", &req.id, None).await.unwrap();

        assert!(gate.take_approved("s1", "delete_record", &args).await);
        assert!(!gate.take_approved("s1", "delete_record", &args).await);
    }

    #[tokio::test]
    async fn test_gc_drops_resolved_only() {
        let gate = gate();
        let keep = gate
            .create("s1", None, "test", "keep", json!({}), None)
            .await;
        let drop = gate
            .create("s1", None, "test", "drop", json!({}), None)
            .await;
        gate.approve("s1", &drop.id, None).await.unwrap();

        assert_eq!(gate.gc_resolved().await, 1);
        assert!(gate.get(&keep.id).await.is_some());
        assert!(gate.get(&drop.id).await.is_none());
    }

    #[test]
    fn test_sensitive_matcher_defaults() {
        let matcher = SensitiveMatcher::new(&[
            "delete".to_string(),
            "execute_sql".to_string(),
            "^send_email$".to_string(),
        ]);
        assert!(matcher.is_sensitive("delete_record"));
        assert!(matcher.is_sensitive("execute_sql"));
        assert!(matcher.is_sensitive("send_email"));
        assert!(!matcher.is_sensitive("web_search"));
    }
}
