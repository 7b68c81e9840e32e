//! Event vocabulary for streamed execution.
//!
//! The driver, router and workflow scheduler publish [`AgentEvent`]s onto an
//! `mpsc` channel; the service layer exposes that channel as the streamed
//! response. Event names serialize lowercase-underscore to match the
//! observability sink contract.

use crate::messages::Message;
use serde::{Deserialize, Serialize};

/// One item in the streamed event sequence of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A request entered the dispatcher.
    ChatRequestReceived { session_id: String, mode: String },

    /// A model call is starting.
    ModelCallStarted { model: String },

    /// Incremental token text from a streaming model call.
    Token { content: String },

    /// A complete message was appended to state.
    MessageAppended { message: Message },

    /// A tool call is being executed.
    ToolCallExecuting { id: String, name: String },

    /// A tool call finished (successfully or as an `Error:` result).
    ToolCallCompleted { id: String, name: String },

    /// A sensitive call was intercepted and an approval record created.
    ApprovalRequestCreated { request_id: String, action_type: String },

    /// The router handed control to a worker.
    Handoff { worker: String },

    /// The scheduler started a workflow round.
    WorkflowRoundStarted { round: u32, steps: Vec<String> },

    /// A workflow step committed its result.
    WorkflowStepCompleted { step_id: String, worker: String },

    /// An error occurred; always emitted before the terminal `Done`.
    Error { message: String },

    /// Terminal event of every stream.
    Done,
}

impl AgentEvent {
    /// Whether this is the terminal event.
    pub fn is_done(&self) -> bool {
        matches!(self, AgentEvent::Done)
    }
}

/// Sending half used by drivers; `None` sinks events for non-streaming runs.
pub type EventSink = Option<tokio::sync::mpsc::Sender<AgentEvent>>;

/// Emit an event to an optional sink, dropping it if the consumer hung up.
pub async fn emit(sink: &EventSink, event: AgentEvent) {
    if let Some(tx) = sink {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_snake_case() {
        let event = AgentEvent::ApprovalRequestCreated {
            request_id: "r1".into(),
            action_type: "tool_execution".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "approval_request_created");
    }

    #[tokio::test]
    async fn test_emit_without_sink_is_noop() {
        emit(&None, AgentEvent::Done).await;
    }
}
