//! The agent loop driver.
//!
//! One run drives reason-act cycles until the model replies without tool
//! calls, a handoff command jumps to another node, or the cycle cap trips.
//! Every cycle persists a checkpoint carrying the full state snapshot plus
//! the cycle's appended messages as pending writes; a crashed or cancelled
//! run resumes from the last committed cycle.

use crate::error::{AgentError, Result};
use crate::middleware::{
    Command, MiddlewareStack, ModelRequest, ModelTerminal, ToolCallRequest, ToolOutcome,
    ToolTerminal,
};
use cadence_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore, PendingWrite,
};
use cadence_core::{
    emit, AgentEvent, AgentState, EventSink, Message, RunContext, ToolRegistry,
};
use cadence_llm::LlmGateway;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Serializes runs per `(thread_id, namespace)` key.
///
/// At most one active cycle writes checkpoints for a session at any time;
/// concurrent requests for the same session queue here.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionLocks {
    /// Empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a key, waiting behind any active run.
    pub async fn acquire(&self, thread_id: &str, ns: &str) -> OwnedMutexGuard<()> {
        let key = format!("{thread_id}/{ns}");
        let lock = {
            let mut map = self.inner.lock();
            map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Checkpoint namespace; empty for the root agent.
    pub checkpoint_ns: String,

    /// Maximum cycles per run.
    pub cycle_cap: usize,

    /// Name stamped on assistant replies (set for workers).
    pub agent_name: Option<String>,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            checkpoint_ns: String::new(),
            cycle_cap: 25,
            agent_name: None,
        }
    }
}

/// How a run ended.
pub enum LoopOutcome {
    /// Terminal state; the last assistant message is the answer.
    Final(AgentState),

    /// A handoff command fired; the router dispatches next.
    Handoff { state: AgentState, command: Command },
}

impl LoopOutcome {
    /// The state regardless of outcome kind.
    pub fn state(&self) -> &AgentState {
        match self {
            LoopOutcome::Final(state) => state,
            LoopOutcome::Handoff { state, .. } => state,
        }
    }

    /// Unwrap into the state.
    pub fn into_state(self) -> AgentState {
        match self {
            LoopOutcome::Final(state) => state,
            LoopOutcome::Handoff { state, .. } => state,
        }
    }
}

/// The reason-act loop over one session namespace.
pub struct AgentLoop {
    gateway: Arc<LlmGateway>,
    tools: Arc<ToolRegistry>,
    middleware: MiddlewareStack,
    checkpointer: Arc<dyn CheckpointStore>,
    config: AgentLoopConfig,
}

/// Innermost model call: hand the request to the gateway.
pub fn gateway_terminal(gateway: Arc<LlmGateway>) -> ModelTerminal {
    Arc::new(move |request: ModelRequest| {
        let gateway = gateway.clone();
        Box::pin(async move {
            let mut chat = cadence_llm::ChatRequest::new(request.messages).with_tools(request.tools);
            chat.model = request.model;
            gateway
                .chat(chat, &request.ctx)
                .await
                .map_err(AgentError::from)
        })
    })
}

/// Innermost tool call: resolve, validate, invoke. Failures become
/// `Error:` tool results so the model can recover next cycle.
pub fn registry_terminal(tools: Arc<ToolRegistry>) -> ToolTerminal {
    Arc::new(move |request: ToolCallRequest| {
        let tools = tools.clone();
        Box::pin(async move {
            let call = &request.call;
            let tool = match tools.resolve(&call.name, &request.role) {
                Ok(tool) => tool,
                Err(err) => {
                    return Ok(ToolOutcome::Result(Message::tool_result(
                        &call.id,
                        format!("Error: {err}"),
                    )))
                }
            };
            if let Err(err) = tools.validate_arguments(tool.as_ref(), &call.arguments) {
                return Ok(ToolOutcome::Result(Message::tool_result(
                    &call.id,
                    format!("Error: {err}"),
                )));
            }
            match tool.invoke(call.arguments.clone(), &request.ctx).await {
                Ok(output) => Ok(ToolOutcome::Result(Message::tool_result(&call.id, output))),
                Err(err) if err.is_cancellation() => Err(AgentError::from(err)),
                Err(err) => Ok(ToolOutcome::Result(Message::tool_result(
                    &call.id,
                    format!("Error: {err}"),
                ))),
            }
        })
    })
}

impl AgentLoop {
    /// Assemble a driver.
    pub fn new(
        gateway: Arc<LlmGateway>,
        tools: Arc<ToolRegistry>,
        middleware: MiddlewareStack,
        checkpointer: Arc<dyn CheckpointStore>,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            gateway,
            tools,
            middleware,
            checkpointer,
            config,
        }
    }

    fn state_to_channels(state: &AgentState) -> Result<HashMap<String, Value>> {
        Ok([
            (
                "messages".to_string(),
                serde_json::to_value(&state.messages).map_err(cadence_core::CoreError::from)?,
            ),
            (
                "metadata".to_string(),
                serde_json::to_value(&state.metadata).map_err(cadence_core::CoreError::from)?,
            ),
        ]
        .into())
    }

    fn state_from_channels(channels: &HashMap<String, Value>) -> Result<AgentState> {
        let messages = channels
            .get("messages")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(cadence_core::CoreError::from)?
            .unwrap_or_default();
        let metadata = channels
            .get("metadata")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(cadence_core::CoreError::from)?
            .unwrap_or_default();
        Ok(AgentState { messages, metadata })
    }

    /// Load the resume point. Store failures degrade to a fresh session.
    async fn load_state(&self, ctx: &RunContext) -> (AgentState, Option<String>, i64) {
        match self
            .checkpointer
            .get_latest(&ctx.session_id, &self.config.checkpoint_ns)
            .await
        {
            Ok(Some(tuple)) => {
                let state = Self::state_from_channels(&tuple.checkpoint.channel_values)
                    .unwrap_or_default();
                let next_step = tuple.metadata.step.unwrap_or(-1) + 1;
                (state, Some(tuple.checkpoint.id), next_step)
            }
            Ok(None) => (AgentState::new(), None, 0),
            Err(err) => {
                warn!(event = "checkpoint_load_failed", error = %err);
                (AgentState::new(), None, 0)
            }
        }
    }

    async fn persist(
        &self,
        state: &AgentState,
        parent_id: &Option<String>,
        metadata: CheckpointMetadata,
        appended: &[Message],
    ) -> Result<String> {
        let channels = Self::state_to_channels(state)?;
        let checkpoint = match parent_id {
            Some(parent) => Checkpoint::child_of(parent.clone(), channels),
            None => Checkpoint::new(channels),
        };
        let checkpoint_id = checkpoint.id.clone();

        let task_id = metadata
            .step
            .map(|step| format!("cycle-{step}"))
            .unwrap_or_else(|| "input".to_string());
        let writes: Vec<PendingWrite> = appended
            .iter()
            .map(|message| {
                Ok((
                    task_id.clone(),
                    "messages".to_string(),
                    serde_json::to_value(message).map_err(cadence_core::CoreError::from)?,
                ))
            })
            .collect::<Result<_>>()?;

        let config = CheckpointConfig {
            thread_id: state
                .metadata
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            checkpoint_ns: self.config.checkpoint_ns.clone(),
            checkpoint_id: None,
        };
        self.checkpointer
            .put(&config, checkpoint, metadata, writes)
            .await?;
        Ok(checkpoint_id)
    }

    fn merge_incoming(state: &mut AgentState, incoming: Vec<Message>, ctx: &RunContext) {
        state.extend(incoming);
        state.set_metadata("session_id", json!(ctx.session_id));
        state.set_metadata("user_role", json!(ctx.user_role));
        if let Some(user_id) = &ctx.user_id {
            state.set_metadata("user_id", json!(user_id));
        }
    }

    /// Run the loop to completion.
    ///
    /// Cancellation does not surface as an error: the run returns the state
    /// as of the last committed checkpoint.
    pub async fn run(
        &self,
        incoming: Vec<Message>,
        ctx: &RunContext,
        events: &EventSink,
    ) -> Result<LoopOutcome> {
        match self.run_inner(incoming, ctx, events).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_cancellation() => {
                debug!(event = "run_cancelled", session_id = %ctx.session_id);
                let (state, _, _) = self.load_state(ctx).await;
                Ok(LoopOutcome::Final(state))
            }
            Err(err) => Err(err),
        }
    }

    async fn run_inner(
        &self,
        incoming: Vec<Message>,
        ctx: &RunContext,
        events: &EventSink,
    ) -> Result<LoopOutcome> {
        let (mut state, mut parent_id, mut step) = self.load_state(ctx).await;
        // Incoming messages ride along as writes of the first cycle's
        // checkpoint; a failed first cycle leaves the step unfinished.
        let mut carried: Vec<Message> = incoming.clone();
        Self::merge_incoming(&mut state, incoming, ctx);

        for _cycle in 0..self.config.cycle_cap {
            ctx.check_live().map_err(AgentError::from)?;

            self.middleware.before_model(&mut state, ctx).await?;

            let request = ModelRequest {
                messages: state.messages.clone(),
                tools: self.tools.descriptors(&ctx.user_role),
                model: None,
                ctx: ctx.clone(),
            };
            let response = self
                .middleware
                .model_call(request, gateway_terminal(self.gateway.clone()))
                .await?;

            let mut reply = response.message;
            if let Some(name) = &self.config.agent_name {
                reply = reply.with_name(name.clone());
            }
            let mut appended = std::mem::take(&mut carried);
            appended.push(reply.clone());
            state.push(reply.clone());
            emit(events, AgentEvent::MessageAppended { message: reply.clone() }).await;

            self.middleware.after_model(&mut state, ctx).await?;

            let calls = reply.tool_calls.clone();
            let mut command = None;
            for call in calls.iter() {
                ctx.check_live().map_err(AgentError::from)?;
                emit(
                    events,
                    AgentEvent::ToolCallExecuting {
                        id: call.id.clone(),
                        name: call.name.clone(),
                    },
                )
                .await;

                let request = ToolCallRequest {
                    call: call.clone(),
                    role: ctx.user_role.clone(),
                    ctx: ctx.clone(),
                };
                let outcome = self
                    .middleware
                    .tool_call(request, registry_terminal(self.tools.clone()))
                    .await?;

                match outcome {
                    ToolOutcome::Result(message) => {
                        emit(
                            events,
                            AgentEvent::ToolCallCompleted {
                                id: call.id.clone(),
                                name: call.name.clone(),
                            },
                        )
                        .await;
                        appended.push(message.clone());
                        state.push(message);
                    }
                    ToolOutcome::Command(cmd) => {
                        command = Some(cmd);
                        break;
                    }
                }
            }

            let id = self
                .persist(&state, &parent_id, CheckpointMetadata::loop_step(step), &appended)
                .await?;
            parent_id = Some(id);
            step += 1;

            if let Some(command) = command {
                return Ok(LoopOutcome::Handoff { state, command });
            }
            if calls.is_empty() {
                return Ok(LoopOutcome::Final(state));
            }
        }

        // Runaway loop: surface in the final state, not as Err.
        warn!(
            event = "cycle_cap_exceeded",
            session_id = %ctx.session_id,
            cap = self.config.cycle_cap
        );
        let notice = Message::assistant(format!(
            "Error: CycleCapExceeded. Aborted after {} agent cycles without a final answer.",
            self.config.cycle_cap
        ));
        state.push(notice.clone());
        state.set_metadata("error", json!("cycle_cap_exceeded"));
        self.persist(
            &state,
            &parent_id,
            CheckpointMetadata::loop_step(step),
            std::slice::from_ref(&notice),
        )
        .await?;
        emit(
            events,
            AgentEvent::Error {
                message: "cycle_cap_exceeded".to_string(),
            },
        )
        .await;
        Ok(LoopOutcome::Final(state))
    }
}
