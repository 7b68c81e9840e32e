use async_trait::async_trait;
use cadence_agents::WorkerCatalog;
use cadence_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore, InMemoryCheckpointStore,
};
use cadence_core::{AgentEvent, CoreError, Message, RunContext};
use cadence_llm::{LlmGateway, ScriptedBackend};
use cadence_workflow::{
    SynthesizerMode, TemplateLibrary, WorkerRunner, WorkflowPlan, WorkflowPlanner,
    WorkflowScheduler, WorkflowState, WorkflowStep,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DIAMOND_YAML: &str = r#"
name: diamond
description: two parallel gathers then a join
steps:
  - id: a
    worker: researcher
    task: Gather part a
  - id: b
    worker: researcher
    task: Gather part b
  - id: c
    worker: analyst
    task: Combine the parts
    depends_on: [a, b]
"#;

/// Deterministic worker pool: replies with the uppercased step id, records
/// prompts and observes fan-out overlap.
struct RecordingRunner {
    prompts: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
    failing: HashSet<String>,
}

impl RecordingRunner {
    fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            latency,
            failing: HashSet::new(),
        })
    }

    fn failing_on(latency: Duration, steps: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            latency,
            failing: steps.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn prompt_for(&self, step_id: &str) -> Option<String> {
        self.prompts
            .lock()
            .iter()
            .find(|(id, _)| id == step_id)
            .map(|(_, prompt)| prompt.clone())
    }
}

#[async_trait]
impl WorkerRunner for RecordingRunner {
    async fn invoke(
        &self,
        _worker: &str,
        step_id: &str,
        prompt: String,
        _ctx: &RunContext,
    ) -> cadence_workflow::Result<String> {
        self.prompts.lock().push((step_id.to_string(), prompt));
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(step_id) {
            return Err(CoreError::ToolExecution {
                tool: "worker".into(),
                reason: format!("step {step_id} blew up"),
            }
            .into());
        }
        Ok(step_id.to_uppercase())
    }
}

fn scheduler_with(
    runner: Arc<dyn WorkerRunner>,
    store: Arc<InMemoryCheckpointStore>,
) -> WorkflowScheduler {
    let gateway = Arc::new(
        LlmGateway::builder()
            .backend(Arc::new(ScriptedBackend::new("m0")))
            .build()
            .unwrap(),
    );
    let catalog = Arc::new(WorkerCatalog::new());
    catalog.register_worker("researcher", "You research.", "finds facts");
    catalog.register_worker("analyst", "You analyze.", "combines findings");
    catalog.register_worker("coder", "You code.", "writes code");

    let mut templates = TemplateLibrary::new();
    templates.insert_yaml(DIAMOND_YAML).unwrap();

    let planner = WorkflowPlanner::new(gateway.clone(), Arc::new(templates), catalog);
    WorkflowScheduler::new(planner, runner, store, gateway)
        .with_synthesizer(SynthesizerMode::Concat)
}

#[tokio::test]
async fn test_parallel_then_dependent_rounds() {
    let runner = RecordingRunner::new(Duration::from_millis(30));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let scheduler = scheduler_with(runner.clone(), store);

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let ctx = RunContext::new("wf-1");
    let state = scheduler
        .run(
            vec![Message::human("run the diamond")],
            Some("diamond"),
            &ctx,
            &Some(tx),
        )
        .await
        .unwrap();

    // Exactly three results, keyed by step id.
    assert_eq!(state.completed.len(), 3);
    assert!(state.is_complete());
    assert_eq!(state.completed["a"].output, "A");
    assert_eq!(state.completed["b"].output, "B");

    // a and b overlapped; c ran alone in the next round.
    assert!(runner.max_in_flight.load(Ordering::SeqCst) >= 2);

    // c saw both dependency outputs in its prompt.
    let c_prompt = runner.prompt_for("c").unwrap();
    assert!(c_prompt.contains("A"));
    assert!(c_prompt.contains("B"));

    // Synthesizer output lists steps in plan order.
    let output = state.final_output.as_deref().unwrap();
    let a_pos = output.find("## a").unwrap();
    let b_pos = output.find("## b").unwrap();
    let c_pos = output.find("## c").unwrap();
    assert!(a_pos < b_pos && b_pos < c_pos);

    // Round events: round 0 fanned out a and b, round 1 ran c.
    let mut rounds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::WorkflowRoundStarted { round, steps } = event {
            rounds.push((round, steps));
        }
    }
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0].0, 0);
    assert_eq!(rounds[0].1.len(), 2);
    assert_eq!(rounds[1].1, vec!["c".to_string()]);
}

#[tokio::test]
async fn test_failed_step_does_not_stop_dependents() {
    let runner = RecordingRunner::failing_on(Duration::from_millis(5), &["a"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let scheduler = scheduler_with(runner.clone(), store);

    let ctx = RunContext::new("wf-2");
    let state = scheduler
        .run(
            vec![Message::human("run the diamond")],
            Some("diamond"),
            &ctx,
            &None,
        )
        .await
        .unwrap();

    assert!(state.is_complete());
    assert!(state.completed["a"].is_error());
    assert!(state.completed["a"].output.starts_with("Error:"));

    // c still executed and saw the error text in its context.
    let c_prompt = runner.prompt_for("c").unwrap();
    assert!(c_prompt.contains("Error:"));
    assert!(c_prompt.contains("B"));
}

#[tokio::test]
async fn test_unsatisfiable_dependency_reports_plan_stuck() {
    let store = Arc::new(InMemoryCheckpointStore::new());

    // Seed a checkpoint with a plan that validation would have rejected.
    let broken = WorkflowState {
        plan: Some(WorkflowPlan {
            name: "broken".into(),
            reasoning: String::new(),
            steps: vec![WorkflowStep {
                id: "x".into(),
                worker: "coder".into(),
                task: "t".into(),
                depends_on: vec!["ghost".into()],
            }],
        }),
        ..WorkflowState::default()
    };
    let channels = [(
        "workflow".to_string(),
        serde_json::to_value(&broken).unwrap(),
    )]
    .into();
    store
        .put(
            &CheckpointConfig::new("wf-3").with_namespace("workflow"),
            Checkpoint::new(channels),
            CheckpointMetadata::loop_step(0),
            vec![],
        )
        .await
        .unwrap();

    let runner = RecordingRunner::new(Duration::ZERO);
    let scheduler = scheduler_with(runner, store);

    let ctx = RunContext::new("wf-3");
    let state = scheduler
        .run(vec![Message::human("continue")], None, &ctx, &None)
        .await
        .unwrap();

    let last = state.messages.last().unwrap();
    assert!(last.content.contains("plan stuck"));
    assert!(!state.is_complete());
}

#[tokio::test]
async fn test_cancellation_keeps_committed_rounds_only() {
    let runner = RecordingRunner::new(Duration::from_millis(200));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let scheduler = scheduler_with(runner.clone(), store.clone());

    let ctx = RunContext::new("wf-4");
    let cancel_ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel_ctx.cancel();
    });

    let state = scheduler
        .run(
            vec![Message::human("run the diamond")],
            Some("diamond"),
            &ctx,
            &None,
        )
        .await
        .unwrap();

    // Round 0 was in flight when the caller cancelled: its partial results
    // were discarded, and the plan checkpoint survives for resumption.
    assert!(state.completed.is_empty());
    assert!(state.plan.is_some());
    assert!(state.final_output.is_none());
}

#[tokio::test]
async fn test_fallback_single_step_plan_runs() {
    let runner = RecordingRunner::new(Duration::ZERO);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let scheduler = scheduler_with(runner.clone(), store);

    let ctx = RunContext::new("wf-5");
    let state = scheduler
        .run(
            // No template and an unmatchable request; the scripted planner
            // backend has no steps, so synthesis fails into the fallback.
            vec![Message::human("just do it")],
            None,
            &ctx,
            &None,
        )
        .await
        .unwrap();

    assert_eq!(state.plan.as_ref().unwrap().name, "fallback");
    assert_eq!(state.completed.len(), 1);
    assert!(state.final_output.is_some());
}
