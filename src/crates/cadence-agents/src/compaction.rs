//! Conversation history compaction.
//!
//! When the estimated token count crosses the trigger, everything except
//! the leading system directive and the last K messages is replaced by one
//! summary message produced through the gateway with the configured
//! summarization model. Summarization failure never fails the request; the
//! uncompacted history is kept and the next cycle tries again.

use crate::error::Result;
use crate::middleware::Middleware;
use async_trait::async_trait;
use cadence_core::{AgentState, Message, MessageRole, RunContext};
use cadence_llm::{ChatRequest, LlmGateway};
use std::sync::Arc;
use tracing::{debug, warn};

const CHARS_PER_TOKEN: usize = 4;

/// Middleware compacting old history into a summary message.
pub struct HistoryCompactor {
    gateway: Arc<LlmGateway>,
    trigger_tokens: usize,
    keep_messages: usize,
    model: String,
}

impl HistoryCompactor {
    /// Compactor with explicit thresholds.
    pub fn new(
        gateway: Arc<LlmGateway>,
        trigger_tokens: usize,
        keep_messages: usize,
        model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            trigger_tokens,
            keep_messages: keep_messages.max(1),
            model: model.into(),
        }
    }

    fn estimate_tokens(messages: &[Message]) -> usize {
        let chars: usize = messages
            .iter()
            .map(|m| {
                m.content.len()
                    + m.tool_calls
                        .iter()
                        .map(|c| c.name.len() + c.arguments.to_string().len())
                        .sum::<usize>()
            })
            .sum();
        chars / CHARS_PER_TOKEN
    }

    fn render_transcript(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    MessageRole::System => "system",
                    MessageRole::Human => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                };
                format!("{role}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn summarize(&self, messages: &[Message], ctx: &RunContext) -> Result<String> {
        let prompt = format!(
            "Summarize the following conversation, preserving decisions, \
             constraints and open tasks. Be concise.\n\n{}",
            Self::render_transcript(messages)
        );
        let request = ChatRequest::new(vec![Message::human(prompt)]).with_model(self.model.as_str());
        let response = self.gateway.chat(request, ctx).await?;
        Ok(response.message.content)
    }
}

#[async_trait]
impl Middleware for HistoryCompactor {
    async fn before_model(&self, state: &mut AgentState, ctx: &RunContext) -> Result<()> {
        if Self::estimate_tokens(&state.messages) <= self.trigger_tokens {
            return Ok(());
        }

        // Never touch the directive slot or the trailing window.
        let has_directive = state
            .messages
            .first()
            .is_some_and(|m| m.role == MessageRole::System);
        let head = if has_directive { 1 } else { 0 };
        if state.messages.len() <= head + self.keep_messages {
            return Ok(());
        }
        let cut = state.messages.len() - self.keep_messages;
        let old = &state.messages[head..cut];

        match self.summarize(old, ctx).await {
            Ok(summary) => {
                debug!(event = "history_compacted", replaced = old.len());
                let summary_msg =
                    Message::system(format!("Summary of earlier conversation: {summary}"));
                let mut compacted = Vec::with_capacity(head + 1 + self.keep_messages);
                compacted.extend_from_slice(&state.messages[..head]);
                compacted.push(summary_msg);
                compacted.extend_from_slice(&state.messages[cut..]);
                state.messages = compacted;
            }
            Err(err) => {
                warn!(event = "history_compaction_failed", error = %err);
            }
        }
        Ok(())
    }
}
