//! Request, response and stream types for model calls.

use crate::error::Result;
use cadence_core::{Message, ToolDescriptor};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;

/// Sampling and length knobs for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Completion token cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// One model call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation so far.
    pub messages: Vec<Message>,

    /// Tools the model may call.
    pub tools: Vec<ToolDescriptor>,

    /// Generation knobs.
    pub params: GenerationParams,

    /// Explicit ring entry point; `None` uses the gateway default.
    pub model: Option<String>,
}

impl ChatRequest {
    /// Create a request from messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Bind tools to the call.
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    /// Start the ring at a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A complete model reply.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant message, possibly carrying tool calls.
    pub message: Message,

    /// Token usage, when reported.
    pub usage: Option<Usage>,

    /// Model that produced the reply.
    pub model: String,

    /// Provider metadata (finish reason and the like).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatResponse {
    /// Build a response from an assistant message.
    pub fn new(model: impl Into<String>, message: Message) -> Self {
        Self {
            message,
            usage: None,
            model: model.into(),
            metadata: HashMap::new(),
        }
    }
}

/// One increment of a streaming reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Token text; may be empty on the final chunk.
    pub content: String,

    /// Set on the terminal chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Lazy, finite, non-restartable chunk sequence. Dropping the stream closes
/// the underlying connection.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;
