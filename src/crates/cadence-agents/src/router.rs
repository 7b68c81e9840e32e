//! Supervisor/worker routing.
//!
//! Multi-agent mode is a routing flavor of the driver. The supervisor's
//! tool list consists solely of declarative handoff descriptors, one per
//! worker, named `transfer_to_<worker>`. Emitted handoff calls never reach
//! a tool; [`HandoffRouting`] intercepts them into [`Command`]s and the
//! router dispatches the named worker's own loop over the shared message
//! list. There is no round-trip back to the supervisor within a turn.

use crate::driver::{AgentLoop, AgentLoopConfig, LoopOutcome};
use crate::error::{AgentError, Result};
use crate::middleware::{
    Command, Middleware, MiddlewareStack, ModelCallNext, ModelRequest, ToolCallNext,
    ToolCallRequest, ToolOutcome,
};
use crate::prompt::SystemDirectiveMiddleware;
use crate::skills::SkillStore;
use async_trait::async_trait;
use cadence_checkpoint::CheckpointStore;
use cadence_core::{
    emit, AgentEvent, AgentState, CoreConfig, EventSink, Message, RunContext, ToolDescriptor,
    ToolRegistry,
};
use cadence_llm::ChatResponse;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const HANDOFF_PREFIX: &str = "transfer_to_";

/// A registered specialist.
#[derive(Debug, Clone)]
pub struct WorkerDefinition {
    pub name: String,
    pub description: String,
    pub system_directive: String,
}

/// Runtime registry of workers.
///
/// Registration rebuilds the handoff descriptor set and the supervisor's
/// worker enumeration on the next run.
#[derive(Default)]
pub struct WorkerCatalog {
    workers: RwLock<BTreeMap<String, WorkerDefinition>>,
}

impl WorkerCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog seeded from configuration.
    pub fn from_config(config: &CoreConfig) -> Self {
        let catalog = Self::new();
        for (name, worker) in &config.worker_catalog {
            catalog.register_worker(name, &worker.system_directive, &worker.description);
        }
        catalog
    }

    /// Add or replace a worker.
    pub fn register_worker(
        &self,
        name: impl Into<String>,
        system_directive: impl Into<String>,
        description: impl Into<String>,
    ) {
        let definition = WorkerDefinition {
            name: name.into(),
            description: description.into(),
            system_directive: system_directive.into(),
        };
        self.workers
            .write()
            .insert(definition.name.clone(), definition);
    }

    /// Fetch a worker.
    pub fn get(&self, name: &str) -> Option<WorkerDefinition> {
        self.workers.read().get(name).cloned()
    }

    /// Registered names in stable order.
    pub fn names(&self) -> Vec<String> {
        self.workers.read().keys().cloned().collect()
    }

    /// Whether any workers exist.
    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// One handoff descriptor per worker.
    pub fn handoff_descriptors(&self) -> Vec<ToolDescriptor> {
        self.workers
            .read()
            .values()
            .map(|worker| ToolDescriptor {
                name: format!("{HANDOFF_PREFIX}{}", worker.name),
                description: format!("Hand the conversation to {}: {}", worker.name, worker.description),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "request": {
                            "type": "string",
                            "description": "What the worker should do"
                        }
                    },
                    "required": ["request"]
                }),
            })
            .collect()
    }

    /// Resolve a handoff tool name to a registered worker.
    pub fn handoff_target(&self, tool_name: &str) -> Option<String> {
        let candidate = tool_name.strip_prefix(HANDOFF_PREFIX)?;
        self.workers.read().contains_key(candidate).then(|| candidate.to_string())
    }

    /// Supervisor directive enumerating the workers.
    pub fn supervisor_directive(&self, base: &str) -> String {
        let mut directive = String::from(base);
        directive.push_str("\n\n## Workers\n");
        directive.push_str(
            "Delegate by calling exactly one transfer tool. \
             Answer directly only when no worker fits.\n",
        );
        for worker in self.workers.read().values() {
            directive.push_str(&format!("- {}: {}\n", worker.name, worker.description));
        }
        directive
    }
}

/// Middleware giving the supervisor its handoff tool list and intercepting
/// emitted handoff calls into [`Command`]s.
pub struct HandoffRouting {
    catalog: Arc<WorkerCatalog>,
}

impl HandoffRouting {
    /// Routing over a catalog.
    pub fn new(catalog: Arc<WorkerCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Middleware for HandoffRouting {
    async fn wrap_model_call(
        &self,
        mut request: ModelRequest,
        next: ModelCallNext,
    ) -> Result<ChatResponse> {
        request.tools = self.catalog.handoff_descriptors();
        next.run(request).await
    }

    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: ToolCallNext,
    ) -> Result<ToolOutcome> {
        match self.catalog.handoff_target(&request.call.name) {
            Some(worker) => Ok(ToolOutcome::Command(Command {
                goto: worker,
                payload: request.call.arguments.clone(),
                tool_call_id: Some(request.call.id.clone()),
            })),
            None => next.run(request).await,
        }
    }
}

/// The multi-agent entry point.
pub struct MultiAgentRouter {
    gateway: Arc<cadence_llm::LlmGateway>,
    tools: Arc<ToolRegistry>,
    checkpointer: Arc<dyn CheckpointStore>,
    catalog: Arc<WorkerCatalog>,
    skills: Arc<SkillStore>,
    shared_layers: Vec<Arc<dyn Middleware>>,
    supervisor_template: String,
    cycle_cap: usize,
}

impl MultiAgentRouter {
    /// Assemble a router. `shared_layers` (approval, filters, probes) apply
    /// to the supervisor and every worker alike.
    pub fn new(
        gateway: Arc<cadence_llm::LlmGateway>,
        tools: Arc<ToolRegistry>,
        checkpointer: Arc<dyn CheckpointStore>,
        catalog: Arc<WorkerCatalog>,
        skills: Arc<SkillStore>,
        shared_layers: Vec<Arc<dyn Middleware>>,
        supervisor_template: impl Into<String>,
        cycle_cap: usize,
    ) -> Self {
        Self {
            gateway,
            tools,
            checkpointer,
            catalog,
            skills,
            shared_layers,
            supervisor_template: supervisor_template.into(),
            cycle_cap,
        }
    }

    fn stack_with(&self, directive: SystemDirectiveMiddleware, routing: bool) -> MiddlewareStack {
        let mut stack = MiddlewareStack::new().with(Arc::new(directive));
        for layer in &self.shared_layers {
            stack.push(layer.clone());
        }
        if routing {
            stack.push(Arc::new(HandoffRouting::new(self.catalog.clone())));
        }
        stack
    }

    fn supervisor_loop(&self) -> AgentLoop {
        let directive = SystemDirectiveMiddleware::new(
            self.catalog.supervisor_directive(&self.supervisor_template),
            self.skills.clone(),
        );
        AgentLoop::new(
            self.gateway.clone(),
            self.tools.clone(),
            self.stack_with(directive, true),
            self.checkpointer.clone(),
            AgentLoopConfig {
                checkpoint_ns: String::new(),
                cycle_cap: self.cycle_cap,
                agent_name: Some("supervisor".to_string()),
            },
        )
    }

    fn worker_loop(&self, worker: &WorkerDefinition) -> AgentLoop {
        let directive =
            SystemDirectiveMiddleware::new(worker.system_directive.clone(), self.skills.clone());
        AgentLoop::new(
            self.gateway.clone(),
            self.tools.clone(),
            self.stack_with(directive, false),
            self.checkpointer.clone(),
            AgentLoopConfig {
                checkpoint_ns: String::new(),
                cycle_cap: self.cycle_cap,
                agent_name: Some(worker.name.clone()),
            },
        )
    }

    /// Route one user turn.
    pub async fn run(
        &self,
        incoming: Vec<Message>,
        ctx: &RunContext,
        events: &EventSink,
    ) -> Result<AgentState> {
        let supervisor = self.supervisor_loop();
        match supervisor.run(incoming, ctx, events).await? {
            LoopOutcome::Final(state) => Ok(state),
            LoopOutcome::Handoff { state: _, command } => {
                let worker = self
                    .catalog
                    .get(&command.goto)
                    .ok_or_else(|| AgentError::WorkerNotFound(command.goto.clone()))?;

                info!(
                    event = "handoff",
                    worker = %worker.name,
                    session_id = %ctx.session_id
                );
                emit(
                    events,
                    AgentEvent::Handoff {
                        worker: worker.name.clone(),
                    },
                )
                .await;

                // Answer the intercepted call so the transcript the worker
                // sees stays well-formed.
                let mut handover = Vec::new();
                if let Some(call_id) = &command.tool_call_id {
                    handover.push(Message::tool_result(
                        call_id,
                        format!("Handed off to {}.", worker.name),
                    ));
                }
                if let Some(request) = command.payload.get("request").and_then(|v| v.as_str()) {
                    handover.push(Message::system(format!(
                        "You were delegated this request: {request}"
                    )));
                }

                let outcome = self.worker_loop(&worker).run(handover, ctx, events).await?;
                Ok(outcome.into_state())
            }
        }
    }
}
