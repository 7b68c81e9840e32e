//! Conversation message model.
//!
//! A session's history is a totally ordered, append-only sequence of
//! [`Message`]s. Every message carries a stable id assigned at construction.
//! Assistant messages may request tool invocations via [`ToolCall`]s; tool
//! messages answer exactly one call through `tool_call_id`.
//!
//! # Example
//!
//! ```rust
//! use cadence_core::messages::{Message, MessageRole, ToolCall};
//! use serde_json::json;
//!
//! let ask = Message::human("Search X");
//! let call = ToolCall::new("web_search", json!({"q": "X"}));
//! let reply = Message::assistant_with_tool_calls("", vec![call.clone()]);
//! let result = Message::tool_result(&call.id, "doc: X");
//!
//! assert!(reply.has_tool_calls());
//! assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
//! # let _ = ask;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Role of the message sender in a conversation.
///
/// Serializes to lowercase strings compatible with OpenAI-style APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System directive: instructions, skill index, memory context.
    System,
    /// End-user input.
    Human,
    /// Model output, possibly carrying tool-call requests.
    Assistant,
    /// Result of a single tool invocation.
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Stable identifier, referenced by the answering tool message.
    pub id: String,

    /// Name of the tool to invoke.
    pub name: String,

    /// Free-form argument map.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a tool call with a fresh id.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    /// Create a tool call with an explicit id (e.g. one echoed by a model).
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A single message in a session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable, immutable id.
    pub id: String,

    /// Sender role.
    pub role: MessageRole,

    /// Text content.
    pub content: String,

    /// Tool invocations requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// For tool messages, the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Optional sender name (worker name for delegated replies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a system directive message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    /// Create a user message.
    pub fn human(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Human, content)
    }

    /// Create a plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Create an assistant message carrying tool-call requests.
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(MessageRole::Assistant, content);
        msg.tool_calls = calls;
        msg
    }

    /// Create a tool-result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(MessageRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Attach a sender name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this is an assistant message.
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    /// Whether this assistant message requests tool invocations.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Per-thread agent state: the message history plus request metadata.
///
/// The only mutation is append; replacement happens solely through the
/// history compactor, which substitutes a synthesized summary for older
/// messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// Ordered message history.
    pub messages: Vec<Message>,

    /// Request metadata: `user_id`, `session_id`, `user_role`, and any
    /// caller-supplied extras.
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, Value>,
}

impl AgentState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append several messages in order.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// Last message, if any.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The caller's role, defaulting to `"user"`.
    pub fn user_role(&self) -> &str {
        self.metadata
            .get("user_role")
            .and_then(Value::as_str)
            .unwrap_or("user")
    }

    /// Set a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_ids_are_stable_and_unique() {
        let a = Message::human("hi");
        let b = Message::human("hi");
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, a.clone().id);
    }

    #[test]
    fn test_tool_result_references_call() {
        let call = ToolCall::new("web_search", json!({"q": "X"}));
        let reply = Message::assistant_with_tool_calls("", vec![call.clone()]);
        assert!(reply.has_tool_calls());

        let result = Message::tool_result(&call.id, "doc: X");
        assert_eq!(result.role, MessageRole::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
    }

    #[test]
    fn test_role_serialization_is_lowercase() {
        let msg = Message::assistant("ok");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], json!("assistant"));
    }

    #[test]
    fn test_state_roundtrip() {
        let mut state = AgentState::new();
        state.push(Message::human("hello"));
        state.set_metadata("user_role", json!("admin"));

        let json = serde_json::to_string(&state).unwrap();
        let restored: AgentState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.messages, state.messages);
        assert_eq!(restored.user_role(), "admin");
    }
}
