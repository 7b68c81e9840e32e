use cadence_agents::{MultiAgentRouter, SkillStore, WorkerCatalog};
use cadence_checkpoint::InMemoryCheckpointStore;
use cadence_core::{AgentEvent, Message, MessageRole, RunContext, ToolCall, ToolRegistry};
use cadence_llm::{LlmGateway, ScriptedBackend};
use serde_json::json;
use std::sync::Arc;

fn router_with(backend: ScriptedBackend) -> MultiAgentRouter {
    let gateway = Arc::new(
        LlmGateway::builder()
            .backend(Arc::new(backend))
            .build()
            .unwrap(),
    );
    let catalog = Arc::new(WorkerCatalog::new());
    catalog.register_worker("researcher", "You research topics.", "finds information");
    catalog.register_worker("coder", "You write code.", "writes code");

    MultiAgentRouter::new(
        gateway,
        Arc::new(ToolRegistry::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        catalog,
        Arc::new(SkillStore::new()),
        vec![],
        "Route each request to the best worker.",
        25,
    )
}

#[tokio::test]
async fn test_handoff_to_coder() {
    // Call 1 answers the supervisor, call 2 answers the coder.
    let backend = ScriptedBackend::new("m0")
        .push_message(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new(
                "transfer_to_coder",
                json!({"request": "write fib"}),
            )],
        ))
        .push_text("def fib(n): return n if n < 2 else fib(n - 1) + fib(n - 2)");
    let router = router_with(backend);

    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let ctx = RunContext::new("s1");
    let state = router
        .run(
            vec![Message::human("Write fib in Python")],
            &ctx,
            &Some(tx),
        )
        .await
        .unwrap();

    let last = state.last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.contains("def fib"));
    assert_eq!(last.name.as_deref(), Some("coder"));

    // Exactly one handoff command was emitted.
    let mut handoffs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::Handoff { worker } = event {
            handoffs.push(worker);
        }
    }
    assert_eq!(handoffs, vec!["coder".to_string()]);
}

#[tokio::test]
async fn test_no_handoff_means_supervisor_answers() {
    let backend = ScriptedBackend::new("m0").push_text("I can answer that directly.");
    let router = router_with(backend);

    let ctx = RunContext::new("s1");
    let state = router
        .run(vec![Message::human("hello")], &ctx, &None)
        .await
        .unwrap();

    let last = state.last().unwrap();
    assert_eq!(last.content, "I can answer that directly.");
    assert_eq!(last.name.as_deref(), Some("supervisor"));
}

#[tokio::test]
async fn test_first_handoff_wins_when_several_emitted() {
    let backend = ScriptedBackend::new("m0")
        .push_message(Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCall::new("transfer_to_researcher", json!({"request": "look up"})),
                ToolCall::new("transfer_to_coder", json!({"request": "write it"})),
            ],
        ))
        .push_text("research notes");
    let router = router_with(backend);

    let ctx = RunContext::new("s1");
    let state = router
        .run(vec![Message::human("do both")], &ctx, &None)
        .await
        .unwrap();

    assert_eq!(state.last().unwrap().name.as_deref(), Some("researcher"));
}

#[tokio::test]
async fn test_worker_sees_delegated_request() {
    let backend = ScriptedBackend::new("m0")
        .push_message(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new(
                "transfer_to_researcher",
                json!({"request": "history of Rust"}),
            )],
        ))
        .push_text("Rust 1.0 shipped in 2015.");
    let router = router_with(backend);

    let ctx = RunContext::new("s1");
    let state = router
        .run(vec![Message::human("Tell me about Rust")], &ctx, &None)
        .await
        .unwrap();

    // The delegation note and the handoff acknowledgement are in history.
    assert!(state
        .messages
        .iter()
        .any(|m| m.content.contains("history of Rust")));
    assert!(state
        .messages
        .iter()
        .any(|m| m.role == MessageRole::Tool && m.content.contains("Handed off to researcher")));
}
