//! Composable middleware around model and tool calls.
//!
//! A middleware is a value implementing up to four hooks; all default to
//! no-ops. The stack is an explicit ordered collection fixed at driver
//! construction. Per cycle the driver invokes every `before_model` in
//! order, runs the model call through the `wrap_model_call` onion (index 0
//! outermost), every `after_model` in order, and each emitted tool call
//! through the `wrap_tool_call` onion.
//!
//! A wrapped tool call resolves to a [`ToolOutcome`]: either a tool-result
//! message appended to state, or a [`Command`] instructing the router to
//! hand control to another node.

use crate::error::Result;
use cadence_core::{AgentState, Message, RunContext, ToolCall, ToolDescriptor};
use cadence_llm::ChatResponse;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// The request flowing through `wrap_model_call`.
#[derive(Clone)]
pub struct ModelRequest {
    /// Messages to send, already shaped by `before_model` hooks.
    pub messages: Vec<Message>,

    /// Tools visible to the model for this call.
    pub tools: Vec<ToolDescriptor>,

    /// Explicit model override; `None` uses the gateway default.
    pub model: Option<String>,

    /// Request context.
    pub ctx: RunContext,
}

/// The request flowing through `wrap_tool_call`.
#[derive(Clone)]
pub struct ToolCallRequest {
    /// The call emitted by the model.
    pub call: ToolCall,

    /// Role of the requesting user.
    pub role: String,

    /// Request context.
    pub ctx: RunContext,
}

/// Routing directive returned instead of a tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Node to hand control to.
    pub goto: String,

    /// Arguments of the handoff call.
    pub payload: Value,

    /// Id of the intercepted call, so the router can acknowledge it.
    pub tool_call_id: Option<String>,
}

/// Result of a wrapped tool call.
pub enum ToolOutcome {
    /// A tool message to append.
    Result(Message),

    /// A jump for the router.
    Command(Command),
}

/// Innermost model call.
pub type ModelTerminal =
    Arc<dyn Fn(ModelRequest) -> BoxFuture<'static, Result<ChatResponse>> + Send + Sync>;

/// Innermost tool execution.
pub type ToolTerminal =
    Arc<dyn Fn(ToolCallRequest) -> BoxFuture<'static, Result<ToolOutcome>> + Send + Sync>;

/// Continuation handed to `wrap_model_call`.
pub struct ModelCallNext {
    chain: VecDeque<Arc<dyn Middleware>>,
    terminal: ModelTerminal,
}

impl ModelCallNext {
    /// Invoke the rest of the onion.
    pub fn run(mut self, request: ModelRequest) -> BoxFuture<'static, Result<ChatResponse>> {
        match self.chain.pop_front() {
            Some(layer) => Box::pin(async move { layer.wrap_model_call(request, self).await }),
            None => (self.terminal)(request),
        }
    }
}

/// Continuation handed to `wrap_tool_call`.
pub struct ToolCallNext {
    chain: VecDeque<Arc<dyn Middleware>>,
    terminal: ToolTerminal,
}

impl ToolCallNext {
    /// Invoke the rest of the onion.
    pub fn run(mut self, request: ToolCallRequest) -> BoxFuture<'static, Result<ToolOutcome>> {
        match self.chain.pop_front() {
            Some(layer) => Box::pin(async move { layer.wrap_tool_call(request, self).await }),
            None => (self.terminal)(request),
        }
    }
}

/// One middleware layer. Every hook is optional.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Runs before each model call; may mutate state (e.g. inject the
    /// system directive or compact history).
    async fn before_model(&self, state: &mut AgentState, ctx: &RunContext) -> Result<()> {
        let _ = (state, ctx);
        Ok(())
    }

    /// Runs after each model reply was appended.
    async fn after_model(&self, state: &mut AgentState, ctx: &RunContext) -> Result<()> {
        let _ = (state, ctx);
        Ok(())
    }

    /// Wraps the model call.
    async fn wrap_model_call(
        &self,
        request: ModelRequest,
        next: ModelCallNext,
    ) -> Result<ChatResponse> {
        next.run(request).await
    }

    /// Wraps each tool call.
    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: ToolCallNext,
    ) -> Result<ToolOutcome> {
        next.run(request).await
    }
}

/// Ordered middleware collection.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    /// Empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer; earlier layers are outermost.
    pub fn with(mut self, layer: Arc<dyn Middleware>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Append a layer in place.
    pub fn push(&mut self, layer: Arc<dyn Middleware>) {
        self.layers.push(layer);
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run every `before_model` hook in order.
    pub async fn before_model(&self, state: &mut AgentState, ctx: &RunContext) -> Result<()> {
        for layer in &self.layers {
            layer.before_model(state, ctx).await?;
        }
        Ok(())
    }

    /// Run every `after_model` hook in order.
    pub async fn after_model(&self, state: &mut AgentState, ctx: &RunContext) -> Result<()> {
        for layer in &self.layers {
            layer.after_model(state, ctx).await?;
        }
        Ok(())
    }

    /// Run a model call through the onion down to `terminal`.
    pub async fn model_call(
        &self,
        request: ModelRequest,
        terminal: ModelTerminal,
    ) -> Result<ChatResponse> {
        let next = ModelCallNext {
            chain: self.layers.iter().cloned().collect(),
            terminal,
        };
        next.run(request).await
    }

    /// Run a tool call through the onion down to `terminal`.
    pub async fn tool_call(
        &self,
        request: ToolCallRequest,
        terminal: ToolTerminal,
    ) -> Result<ToolOutcome> {
        let next = ToolCallNext {
            chain: self.layers.iter().cloned().collect(),
            terminal,
        };
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::MessageRole;
    use parking_lot::Mutex;

    struct Tagger {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tagger {
        async fn wrap_model_call(
            &self,
            request: ModelRequest,
            next: ModelCallNext,
        ) -> Result<ChatResponse> {
            self.log.lock().push(format!("enter:{}", self.label));
            let response = next.run(request).await;
            self.log.lock().push(format!("exit:{}", self.label));
            response
        }
    }

    fn echo_terminal() -> ModelTerminal {
        Arc::new(|request: ModelRequest| {
            Box::pin(async move {
                Ok(ChatResponse::new(
                    "test",
                    Message::assistant(format!("{} msgs", request.messages.len())),
                ))
            })
        })
    }

    #[tokio::test]
    async fn test_onion_order_index_zero_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = MiddlewareStack::new()
            .with(Arc::new(Tagger {
                label: "outer",
                log: log.clone(),
            }))
            .with(Arc::new(Tagger {
                label: "inner",
                log: log.clone(),
            }));

        let request = ModelRequest {
            messages: vec![Message::human("hi")],
            tools: vec![],
            model: None,
            ctx: RunContext::new("s1"),
        };
        let response = stack.model_call(request, echo_terminal()).await.unwrap();
        assert_eq!(response.message.role, MessageRole::Assistant);

        let entries = log.lock().clone();
        assert_eq!(entries, vec!["enter:outer", "enter:inner", "exit:inner", "exit:outer"]);
    }

    #[tokio::test]
    async fn test_empty_stack_reaches_terminal() {
        let stack = MiddlewareStack::new();
        let request = ModelRequest {
            messages: vec![Message::human("a"), Message::human("b")],
            tools: vec![],
            model: None,
            ctx: RunContext::new("s1"),
        };
        let response = stack.model_call(request, echo_terminal()).await.unwrap();
        assert_eq!(response.message.content, "2 msgs");
    }
}
