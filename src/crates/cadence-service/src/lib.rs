//! Service facade for the cadence orchestration core.
//!
//! [`AgentService`] wires the shared infrastructure (gateway, tool
//! registry, checkpoint store, approval gate, skill store, worker catalog)
//! and exposes the inbound contract: `execute` over the three modes,
//! streaming execution, approval resolution, template listing and external
//! tool refresh. Transport layering lives outside this crate.
//!
//! # Example
//!
//! ```rust,ignore
//! let service = AgentService::builder()
//!     .config(CoreConfig::from_env())
//!     .gateway(gateway)
//!     .build()
//!     .await?;
//!
//! let state = service
//!     .execute(ExecuteRequest::new(
//!         ExecutionMode::Single,
//!         "session-1",
//!         vec![Message::human("hello")],
//!     ))
//!     .await?;
//! ```

pub mod bridge;
pub mod error;
pub mod sessions;

pub use bridge::{
    discover, load_bridge_endpoints, qualified_name, BridgeEndpoint, BridgeToolDescriptor,
    HttpToolBridge, ToolBridge,
};
pub use error::{Result, ServiceError};
pub use sessions::{SessionIndex, SessionRecord};

use cadence_agents::{
    builtin_tools, AgentLoop, AgentLoopConfig, ApprovalGate, ApprovalMiddleware, ApprovalRequest,
    HistoryCompactor, KnowledgeRetriever, MetricsMiddleware, Middleware, MiddlewareStack,
    MultiAgentRouter, ObservabilityMiddleware, RoleToolFilter, SessionLocks, Skill, SkillStore,
    SystemDirectiveMiddleware, WorkerCatalog,
};
use cadence_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use cadence_core::{
    emit, AgentEvent, AgentState, CoreConfig, EventSink, Message, RunContext, Tool, ToolRegistry,
};
use cadence_llm::{LlmGateway, OpenAiCompatibleBackend, OpenAiConfig, RetryPolicy};
use cadence_workflow::{
    AgentWorkerRunner, SynthesizerMode, TemplateLibrary, WorkflowPlanner, WorkflowScheduler,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

const DEFAULT_SYSTEM_TEMPLATE: &str =
    "You are a capable assistant. Use the available tools when they help, \
     and answer directly when they do not.";

const DEFAULT_SUPERVISOR_TEMPLATE: &str =
    "You are a supervisor. Route each user request to the most suitable worker.";

/// Which driver handles the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One agent loop with the full tool set.
    Single,

    /// Supervisor plus specialist workers.
    Multi,

    /// Planned DAG execution over the worker pool.
    Workflow,
}

impl std::str::FromStr for ExecutionMode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(ExecutionMode::Single),
            "multi" => Ok(ExecutionMode::Multi),
            "workflow" => Ok(ExecutionMode::Workflow),
            other => Err(ServiceError::Config(format!("unknown mode '{other}'"))),
        }
    }
}

/// One inbound request.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub mode: ExecutionMode,
    pub session_id: String,
    pub user_id: Option<String>,
    pub role: String,
    pub messages: Vec<Message>,
    pub template: Option<String>,
}

impl ExecuteRequest {
    /// A request with the default `"user"` role.
    pub fn new(
        mode: ExecutionMode,
        session_id: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            mode,
            session_id: session_id.into(),
            user_id: None,
            role: "user".to_string(),
            messages,
            template: None,
        }
    }

    /// Set the user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Name a workflow template explicitly.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

/// The wired orchestration core.
pub struct AgentService {
    config: CoreConfig,
    gateway: Arc<LlmGateway>,
    tools: Arc<ToolRegistry>,
    checkpointer: Arc<dyn CheckpointStore>,
    approvals: Arc<ApprovalGate>,
    skills: Arc<SkillStore>,
    catalog: Arc<WorkerCatalog>,
    templates: Arc<TemplateLibrary>,
    metrics: Arc<MetricsMiddleware>,
    shared_layers: Vec<Arc<dyn Middleware>>,
    bridges: Vec<Arc<dyn ToolBridge>>,
    locks: SessionLocks,
    sessions: SessionIndex,
    system_template: String,
    supervisor_template: String,
    synthesizer: SynthesizerMode,
    sweeper: tokio::task::JoinHandle<()>,
}

impl Drop for AgentService {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Builder for [`AgentService`].
pub struct AgentServiceBuilder {
    config: CoreConfig,
    gateway: Option<Arc<LlmGateway>>,
    checkpointer: Option<Arc<dyn CheckpointStore>>,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
    bridges: Vec<Arc<dyn ToolBridge>>,
    extra_tools: Vec<Arc<dyn Tool>>,
    system_template: String,
    supervisor_template: String,
    compaction: bool,
    llm_synthesizer: bool,
}

impl AgentServiceBuilder {
    fn new() -> Self {
        Self {
            config: CoreConfig::default(),
            gateway: None,
            checkpointer: None,
            retriever: None,
            bridges: Vec::new(),
            extra_tools: Vec::new(),
            system_template: DEFAULT_SYSTEM_TEMPLATE.to_string(),
            supervisor_template: DEFAULT_SUPERVISOR_TEMPLATE.to_string(),
            compaction: true,
            llm_synthesizer: false,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a pre-built gateway instead of one derived from the config.
    pub fn gateway(mut self, gateway: Arc<LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Use a specific checkpoint backend (default: in-memory).
    pub fn checkpointer(mut self, checkpointer: Arc<dyn CheckpointStore>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Wire the external knowledge retriever.
    pub fn retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Add a tool bridge beyond those from the config file.
    pub fn bridge(mut self, bridge: Arc<dyn ToolBridge>) -> Self {
        self.bridges.push(bridge);
        self
    }

    /// Register an additional tool.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    /// Override the single-agent system template.
    pub fn system_template(mut self, template: impl Into<String>) -> Self {
        self.system_template = template.into();
        self
    }

    /// Disable history compaction.
    pub fn without_compaction(mut self) -> Self {
        self.compaction = false;
        self
    }

    /// Summarize workflow results with the model instead of concatenating.
    pub fn llm_synthesizer(mut self) -> Self {
        self.llm_synthesizer = true;
        self
    }

    fn default_gateway(config: &CoreConfig) -> Result<Arc<LlmGateway>> {
        let api_key = std::env::var("CADENCE_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default();
        let base_url = std::env::var("CADENCE_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let mut builder = LlmGateway::builder()
            .defaults(
                Duration::from_secs(config.per_backend_timeout_seconds),
                config.per_backend_concurrency,
            )
            .retry(
                RetryPolicy::new(config.retry_attempts)
                    .with_base_interval(config.retry_backoff_base_seconds),
            );
        for model in config.effective_ring() {
            let backend =
                OpenAiCompatibleBackend::new(OpenAiConfig::new(&base_url, &api_key, model))
                    .map_err(|e| ServiceError::Config(e.to_string()))?;
            builder = builder.backend(Arc::new(backend));
        }
        builder
            .build()
            .map(Arc::new)
            .map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Assemble the service: load skills and templates, register tools,
    /// start the approval sweeper and run initial bridge discovery.
    pub async fn build(self) -> Result<Arc<AgentService>> {
        self.config
            .validate()
            .map_err(|e| ServiceError::Config(e.to_string()))?;
        let config = self.config;

        let gateway = match self.gateway {
            Some(gateway) => gateway,
            None => Self::default_gateway(&config)?,
        };
        let checkpointer = self
            .checkpointer
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new()));

        let skills = Arc::new(match &config.skills_path {
            Some(path) => SkillStore::with_dir(path.clone()),
            None => SkillStore::new(),
        });
        skills
            .load_persisted()
            .await
            .map_err(ServiceError::from)?;

        let tools = Arc::new(ToolRegistry::new());
        tools.register_all(builtin_tools(skills.clone(), self.retriever));
        tools.register_all(self.extra_tools);

        let approvals = ApprovalGate::new(Duration::from_secs(config.approval_ttl_seconds));
        let sweeper = approvals
            .spawn_sweeper(Duration::from_secs(config.approval_sweep_interval_seconds));

        let metrics = MetricsMiddleware::new();
        let mut shared_layers: Vec<Arc<dyn Middleware>> = Vec::new();
        if self.compaction {
            shared_layers.push(Arc::new(HistoryCompactor::new(
                gateway.clone(),
                config.summarization_trigger_tokens,
                config.summarization_keep_messages,
                config.summarization_model(),
            )));
        }
        shared_layers.push(Arc::new(RoleToolFilter::new()));
        shared_layers.push(Arc::new(ObservabilityMiddleware));
        shared_layers.push(metrics.clone());
        shared_layers.push(Arc::new(ApprovalMiddleware::new(
            approvals.clone(),
            &config.sensitive_tool_patterns,
        )));

        let catalog = Arc::new(WorkerCatalog::from_config(&config));
        if catalog.is_empty() {
            catalog.register_worker(
                "researcher",
                "You are a research specialist. Find, verify and summarize information.",
                "finds and summarizes information",
            );
            catalog.register_worker(
                "coder",
                "You are a senior software engineer. Write correct, idiomatic code.",
                "writes and reviews code",
            );
            catalog.register_worker(
                "analyst",
                "You are an analyst. Combine findings into clear conclusions.",
                "combines findings into conclusions",
            );
        }

        let templates = Arc::new(match &config.workflow_templates_path {
            Some(path) => TemplateLibrary::load_dir(path).await?,
            None => TemplateLibrary::new(),
        });

        let mut bridges = self.bridges;
        if let Some(path) = &config.external_tool_bridge_config {
            match load_bridge_endpoints(path).await {
                Ok(endpoints) => {
                    for endpoint in endpoints {
                        match HttpToolBridge::new(&endpoint) {
                            Ok(bridge) => bridges.push(Arc::new(bridge)),
                            Err(err) => warn!(event = "bridge_config_invalid", error = %err),
                        }
                    }
                }
                Err(err) => warn!(event = "bridge_config_unreadable", error = %err),
            }
        }

        let service = Arc::new(AgentService {
            synthesizer: if self.llm_synthesizer {
                SynthesizerMode::Llm
            } else {
                SynthesizerMode::Concat
            },
            config,
            gateway,
            tools,
            checkpointer,
            approvals,
            skills,
            catalog,
            templates,
            metrics,
            shared_layers,
            bridges,
            locks: SessionLocks::new(),
            sessions: SessionIndex::new(),
            system_template: self.system_template,
            supervisor_template: self.supervisor_template,
            sweeper,
        });

        // Startup discovery; a dead bridge must not block boot.
        if let Err(err) = service.refresh_external_tools().await {
            warn!(event = "initial_bridge_discovery_failed", error = %err);
        }
        Ok(service)
    }
}

impl AgentService {
    /// Start building a service.
    pub fn builder() -> AgentServiceBuilder {
        AgentServiceBuilder::new()
    }

    fn run_context(&self, request: &ExecuteRequest) -> RunContext {
        let mut ctx = RunContext::new(&request.session_id)
            .with_role(&request.role)
            .with_budget(Duration::from_secs(self.config.per_request_budget_seconds));
        if let Some(user_id) = &request.user_id {
            ctx = ctx.with_user(user_id.clone());
        }
        ctx
    }

    fn single_agent(&self) -> AgentLoop {
        let mut stack = MiddlewareStack::new().with(Arc::new(SystemDirectiveMiddleware::new(
            self.system_template.clone(),
            self.skills.clone(),
        )));
        for layer in &self.shared_layers {
            stack.push(layer.clone());
        }
        AgentLoop::new(
            self.gateway.clone(),
            self.tools.clone(),
            stack,
            self.checkpointer.clone(),
            AgentLoopConfig {
                checkpoint_ns: String::new(),
                cycle_cap: self.config.cycle_cap,
                agent_name: None,
            },
        )
    }

    fn router(&self) -> MultiAgentRouter {
        MultiAgentRouter::new(
            self.gateway.clone(),
            self.tools.clone(),
            self.checkpointer.clone(),
            self.catalog.clone(),
            self.skills.clone(),
            self.shared_layers.clone(),
            self.supervisor_template.clone(),
            self.config.cycle_cap,
        )
    }

    fn scheduler(&self) -> WorkflowScheduler {
        let planner = WorkflowPlanner::new(
            self.gateway.clone(),
            self.templates.clone(),
            self.catalog.clone(),
        );
        let runner = AgentWorkerRunner::new(
            self.gateway.clone(),
            self.tools.clone(),
            self.checkpointer.clone(),
            self.catalog.clone(),
            self.skills.clone(),
            self.shared_layers.clone(),
            self.config.cycle_cap,
        );
        WorkflowScheduler::new(
            planner,
            Arc::new(runner),
            self.checkpointer.clone(),
            self.gateway.clone(),
        )
        .with_synthesizer(self.synthesizer)
    }

    async fn execute_with_events(
        &self,
        request: ExecuteRequest,
        events: EventSink,
    ) -> Result<AgentState> {
        self.sessions
            .ensure(&request.session_id, request.user_id.as_deref())
            .await;
        let ctx = self.run_context(&request);

        let mode = match request.mode {
            ExecutionMode::Single => "single",
            ExecutionMode::Multi => "multi",
            ExecutionMode::Workflow => "workflow",
        };
        info!(
            event = "chat_request_received",
            session_id = %request.session_id,
            mode,
            messages = request.messages.len()
        );
        emit(
            &events,
            AgentEvent::ChatRequestReceived {
                session_id: request.session_id.clone(),
                mode: mode.to_string(),
            },
        )
        .await;

        // One active cycle per session: concurrent requests queue here.
        let _guard = self.locks.acquire(&request.session_id, "").await;

        let state = match request.mode {
            ExecutionMode::Single => self
                .single_agent()
                .run(request.messages, &ctx, &events)
                .await?
                .into_state(),
            ExecutionMode::Multi => self.router().run(request.messages, &ctx, &events).await?,
            ExecutionMode::Workflow => {
                let workflow = self
                    .scheduler()
                    .run(
                        request.messages,
                        request.template.as_deref(),
                        &ctx,
                        &events,
                    )
                    .await?;
                let mut state = AgentState {
                    messages: workflow.messages,
                    metadata: Default::default(),
                };
                state.set_metadata("session_id", json!(request.session_id));
                state.set_metadata("workflow_rounds", json!(workflow.current_round));
                state
            }
        };
        Ok(state)
    }

    /// Run a request to completion and return the final state.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<AgentState> {
        self.execute_with_events(request, None).await
    }

    /// Run a request, streaming events. Errors surface as an `error` event
    /// before the terminal `done`; the stream always terminates.
    pub fn execute_stream(self: Arc<Self>, request: ExecuteRequest) -> ReceiverStream<AgentEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let service = self;
        tokio::spawn(async move {
            let sink = Some(tx.clone());
            if let Err(err) = service.execute_with_events(request, sink).await {
                let _ = tx
                    .send(AgentEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
            }
            let _ = tx.send(AgentEvent::Done).await;
        });
        ReceiverStream::new(rx)
    }

    /// Pending approvals for a session.
    pub async fn list_pending_approvals(&self, session_id: &str) -> Vec<ApprovalRequest> {
        self.approvals.list_pending(Some(session_id)).await
    }

    /// Approve a request owned by `session_id`.
    pub async fn approve(
        &self,
        session_id: &str,
        request_id: &str,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        Ok(self.approvals.approve(session_id, request_id, comment).await?)
    }

    /// Reject a request owned by `session_id`.
    pub async fn reject(
        &self,
        session_id: &str,
        request_id: &str,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        Ok(self.approvals.reject(session_id, request_id, comment).await?)
    }

    /// `(name, description)` of every loaded workflow template.
    pub fn list_workflow_templates(&self) -> Vec<(String, String)> {
        self.templates.list()
    }

    /// Re-discover every configured bridge. Returns tools registered.
    pub async fn refresh_external_tools(&self) -> Result<usize> {
        let mut total = 0;
        for bridge in &self.bridges {
            total += discover(&self.tools, bridge.clone()).await?;
        }
        Ok(total)
    }

    /// Add a worker at runtime; the supervisor's handoff set follows.
    pub fn register_worker(
        &self,
        name: impl Into<String>,
        system_directive: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.catalog
            .register_worker(name, system_directive, description);
    }

    /// Insert or replace a skill.
    pub async fn register_skill(&self, skill: Skill) {
        self.skills.insert(skill).await;
    }

    /// Destroy a session and its checkpoints.
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        if !self.sessions.remove(session_id).await {
            return Err(ServiceError::SessionNotFound(session_id.to_string()));
        }
        self.checkpointer.delete_thread(session_id).await?;
        Ok(())
    }

    /// Known sessions.
    pub async fn list_sessions(&self) -> Vec<SessionRecord> {
        self.sessions.list().await
    }

    /// The tool registry.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Model-call latency histograms.
    pub fn metrics(&self) -> &Arc<MetricsMiddleware> {
        &self.metrics
    }
}
