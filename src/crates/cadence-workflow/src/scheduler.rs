//! Round-based parallel plan executor.
//!
//! The scheduler is a state machine: planner, then repeated
//! assigner/fan-out/check rounds, then the synthesizer. Each round scatters
//! every eligible step onto the worker pool and gathers all of them at a
//! join barrier before the next round starts, so round `r+1` observes every
//! result committed in round `r`. Within a round tasks are independent;
//! their results merge through the commutative keyed union on
//! [`WorkflowState::completed`].
//!
//! A failed or timed-out step commits an `Error:`-shaped result and its
//! dependents still run. A round cap of `|steps| + 2` guards against
//! dependency-planning bugs; tripping it reports `PlanStuck` in the final
//! message. Cancellation aborts the in-flight round, keeps every committed
//! checkpoint, and the next run resumes from the assigner.

use crate::error::{Result, WorkflowError};
use crate::plan::{StepResult, WorkflowState, WorkflowStep};
use crate::planner::WorkflowPlanner;
use cadence_agents::{AgentLoop, AgentLoopConfig, MiddlewareStack, Middleware, SkillStore};
use cadence_agents::prompt::SystemDirectiveMiddleware;
use cadence_agents::WorkerCatalog;
use cadence_checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore};
use cadence_core::{
    emit, AgentEvent, EventSink, Message, MessageRole, RunContext, ToolRegistry,
};
use cadence_llm::{ChatRequest, LlmGateway};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

const WORKFLOW_NS: &str = "workflow";

/// Executes one step's task on a named worker.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    /// Run `prompt` on `worker`, isolated under `step_id`.
    async fn invoke(
        &self,
        worker: &str,
        step_id: &str,
        prompt: String,
        ctx: &RunContext,
    ) -> Result<String>;
}

/// [`WorkerRunner`] backed by per-step agent loops over the worker catalog.
pub struct AgentWorkerRunner {
    gateway: Arc<LlmGateway>,
    tools: Arc<ToolRegistry>,
    checkpointer: Arc<dyn CheckpointStore>,
    catalog: Arc<WorkerCatalog>,
    skills: Arc<SkillStore>,
    shared_layers: Vec<Arc<dyn Middleware>>,
    cycle_cap: usize,
}

impl AgentWorkerRunner {
    /// Assemble a runner sharing the service's registries.
    pub fn new(
        gateway: Arc<LlmGateway>,
        tools: Arc<ToolRegistry>,
        checkpointer: Arc<dyn CheckpointStore>,
        catalog: Arc<WorkerCatalog>,
        skills: Arc<SkillStore>,
        shared_layers: Vec<Arc<dyn Middleware>>,
        cycle_cap: usize,
    ) -> Self {
        Self {
            gateway,
            tools,
            checkpointer,
            catalog,
            skills,
            shared_layers,
            cycle_cap,
        }
    }
}

#[async_trait]
impl WorkerRunner for AgentWorkerRunner {
    async fn invoke(
        &self,
        worker: &str,
        step_id: &str,
        prompt: String,
        ctx: &RunContext,
    ) -> Result<String> {
        let definition = self
            .catalog
            .get(worker)
            .ok_or_else(|| WorkflowError::UnknownWorker(worker.to_string()))?;

        let mut stack = MiddlewareStack::new().with(Arc::new(SystemDirectiveMiddleware::new(
            definition.system_directive.clone(),
            self.skills.clone(),
        )));
        for layer in &self.shared_layers {
            stack.push(layer.clone());
        }

        // Each step gets its own namespace so parallel tasks never contend
        // on one checkpoint key.
        let agent = AgentLoop::new(
            self.gateway.clone(),
            self.tools.clone(),
            stack,
            self.checkpointer.clone(),
            AgentLoopConfig {
                checkpoint_ns: format!("{WORKFLOW_NS}:{step_id}"),
                cycle_cap: self.cycle_cap,
                agent_name: Some(definition.name.clone()),
            },
        );

        let outcome = agent.run(vec![Message::human(prompt)], ctx, &None).await?;
        let state = outcome.into_state();
        Ok(state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}

/// How the terminal node collapses step outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesizerMode {
    /// Deterministic plan-order concatenation under headings.
    Concat,

    /// One gateway call summarizing across results.
    Llm,
}

/// The workflow state machine.
pub struct WorkflowScheduler {
    planner: WorkflowPlanner,
    runner: Arc<dyn WorkerRunner>,
    checkpointer: Arc<dyn CheckpointStore>,
    gateway: Arc<LlmGateway>,
    synthesizer: SynthesizerMode,
}

impl WorkflowScheduler {
    /// Assemble a scheduler.
    pub fn new(
        planner: WorkflowPlanner,
        runner: Arc<dyn WorkerRunner>,
        checkpointer: Arc<dyn CheckpointStore>,
        gateway: Arc<LlmGateway>,
    ) -> Self {
        Self {
            planner,
            runner,
            checkpointer,
            gateway,
            synthesizer: SynthesizerMode::Concat,
        }
    }

    /// Select the synthesizer.
    pub fn with_synthesizer(mut self, mode: SynthesizerMode) -> Self {
        self.synthesizer = mode;
        self
    }

    async fn load_state(&self, ctx: &RunContext) -> WorkflowState {
        match self
            .checkpointer
            .get_latest(&ctx.session_id, WORKFLOW_NS)
            .await
        {
            Ok(Some(tuple)) => tuple
                .checkpoint
                .channel("workflow")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_default(),
            Ok(None) => WorkflowState::new(),
            Err(err) => {
                warn!(event = "workflow_state_load_failed", error = %err);
                WorkflowState::new()
            }
        }
    }

    async fn persist(&self, state: &WorkflowState, ctx: &RunContext) -> Result<()> {
        let latest = self
            .checkpointer
            .get_latest(&ctx.session_id, WORKFLOW_NS)
            .await
            .ok()
            .flatten();

        let channels: HashMap<String, Value> =
            [("workflow".to_string(), serde_json::to_value(state)?)].into();
        let checkpoint = match latest {
            Some(tuple) => Checkpoint::child_of(tuple.checkpoint.id, channels),
            None => Checkpoint::new(channels),
        };
        let config = CheckpointConfig::new(&ctx.session_id).with_namespace(WORKFLOW_NS);
        self.checkpointer
            .put(
                &config,
                checkpoint,
                CheckpointMetadata::loop_step(state.current_round as i64),
                vec![],
            )
            .await?;
        Ok(())
    }

    fn task_prompt(state: &WorkflowState, step: &WorkflowStep) -> String {
        match state.dependency_context(step) {
            Some(context) => format!(
                "{}\n\n## Context from completed steps\n{}",
                step.task, context
            ),
            None => step.task.clone(),
        }
    }

    fn synthesize_concat(state: &WorkflowState) -> String {
        let Some(plan) = &state.plan else {
            return String::new();
        };
        let mut output = format!("# Workflow '{}' results\n", plan.name);
        for step in &plan.steps {
            if let Some(result) = state.completed.get(&step.id) {
                output.push_str(&format!(
                    "\n## {} ({})\n{}\n",
                    step.id, result.worker, result.output
                ));
            }
        }
        output
    }

    async fn synthesize(&self, state: &WorkflowState, ctx: &RunContext) -> String {
        let concat = Self::synthesize_concat(state);
        match self.synthesizer {
            SynthesizerMode::Concat => concat,
            SynthesizerMode::Llm => {
                let prompt = format!(
                    "Write one coherent answer for the user from these workflow \
                     step results, in order:\n\n{concat}"
                );
                match self
                    .gateway
                    .chat(ChatRequest::new(vec![Message::human(prompt)]), ctx)
                    .await
                {
                    Ok(response) => response.message.content,
                    Err(err) => {
                        warn!(event = "synthesis_failed", error = %err);
                        concat
                    }
                }
            }
        }
    }

    /// Execute one workflow request to its final message.
    pub async fn run(
        &self,
        incoming: Vec<Message>,
        template: Option<&str>,
        ctx: &RunContext,
        events: &EventSink,
    ) -> Result<WorkflowState> {
        match self.run_inner(incoming, template, ctx, events).await {
            Ok(state) => Ok(state),
            Err(err) if err.is_cancellation() => {
                info!(event = "workflow_cancelled", session_id = %ctx.session_id);
                Ok(self.load_state(ctx).await)
            }
            Err(err) => Err(err),
        }
    }

    async fn run_inner(
        &self,
        incoming: Vec<Message>,
        template: Option<&str>,
        ctx: &RunContext,
        events: &EventSink,
    ) -> Result<WorkflowState> {
        let mut state = self.load_state(ctx).await;
        state.messages.extend(incoming);

        if state.plan.is_none() {
            let user_message = state
                .messages
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::Human)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let plan = self.planner.plan(template, &user_message, ctx).await;
            info!(event = "workflow_planned", name = %plan.name, steps = plan.steps.len());
            state.plan = Some(plan);
            self.persist(&state, ctx).await?;
        }

        let Some(plan) = state.plan.clone() else {
            return Err(WorkflowError::InvalidPlan("planner produced no plan".into()));
        };
        let round_cap = (plan.steps.len() + 2) as u32;

        while !state.is_complete() {
            ctx.check_live().map_err(WorkflowError::from)?;

            let eligible = state.eligible();
            if eligible.is_empty() || state.current_round >= round_cap {
                // Either outcome is a dependency-planning bug.
                let rounds = state.current_round;
                warn!(event = "plan_stuck", rounds, completed = state.completed.len());
                let notice = Message::assistant(format!(
                    "Error: {}",
                    WorkflowError::PlanStuck { rounds }
                ));
                state.messages.push(notice);
                self.persist(&state, ctx).await?;
                emit(events, AgentEvent::Error { message: "plan_stuck".into() }).await;
                return Ok(state);
            }

            emit(
                events,
                AgentEvent::WorkflowRoundStarted {
                    round: state.current_round,
                    steps: eligible.iter().map(|s| s.id.clone()).collect(),
                },
            )
            .await;

            // Scatter: one task per eligible step.
            let mut tasks: JoinSet<StepResult> = JoinSet::new();
            for step in eligible {
                let prompt = Self::task_prompt(&state, &step);
                let runner = self.runner.clone();
                let task_ctx = ctx.clone();
                tasks.spawn(async move {
                    let output = match runner
                        .invoke(&step.worker, &step.id, prompt, &task_ctx)
                        .await
                    {
                        Ok(output) => output,
                        Err(err) => format!("Error: {err}"),
                    };
                    StepResult {
                        step_id: step.id,
                        worker: step.worker,
                        task: step.task,
                        output,
                    }
                });
            }

            // Gather: the join barrier. Cancellation drops the round's
            // uncommitted results on the floor.
            loop {
                tokio::select! {
                    _ = ctx.cancellation.wait() => {
                        tasks.abort_all();
                        return Err(WorkflowError::Core(cadence_core::CoreError::Cancelled));
                    }
                    joined = tasks.join_next() => match joined {
                        None => break,
                        Some(Ok(result)) => {
                            emit(
                                events,
                                AgentEvent::WorkflowStepCompleted {
                                    step_id: result.step_id.clone(),
                                    worker: result.worker.clone(),
                                },
                            )
                            .await;
                            state.merge_result(result)?;
                        }
                        Some(Err(join_err)) => {
                            warn!(event = "worker_task_panicked", error = %join_err);
                        }
                    }
                }
            }

            state.current_round += 1;
            self.persist(&state, ctx).await?;
        }

        let output = self.synthesize(&state, ctx).await;
        state.final_output = Some(output.clone());
        state.messages.push(Message::assistant(output));
        self.persist(&state, ctx).await?;
        info!(
            event = "workflow_completed",
            session_id = %ctx.session_id,
            rounds = state.current_round,
            steps = state.completed.len()
        );
        Ok(state)
    }
}
