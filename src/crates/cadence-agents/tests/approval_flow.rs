use async_trait::async_trait;
use cadence_agents::{
    AgentLoop, AgentLoopConfig, ApprovalGate, ApprovalMiddleware, ApprovalStatus, MiddlewareStack,
};
use cadence_checkpoint::InMemoryCheckpointStore;
use cadence_core::{Message, MessageRole, RunContext, Tool, ToolCall, ToolRegistry};
use cadence_llm::{LlmGateway, ScriptedBackend};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct DeleteRecordTool {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for DeleteRecordTool {
    fn name(&self) -> &str {
        "delete_record"
    }

    fn description(&self) -> &str {
        "Delete a record by id"
    }

    fn is_sensitive(&self) -> bool {
        true
    }

    async fn invoke(&self, _args: Value, _ctx: &RunContext) -> cadence_core::Result<String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok("deleted".to_string())
    }
}

fn harness(
    backend: ScriptedBackend,
    gate: Arc<ApprovalGate>,
) -> (AgentLoop, Arc<AtomicUsize>) {
    let gateway = Arc::new(
        LlmGateway::builder()
            .backend(Arc::new(backend))
            .build()
            .unwrap(),
    );
    let invocations = Arc::new(AtomicUsize::new(0));
    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(DeleteRecordTool {
        invocations: invocations.clone(),
    }));
    let middleware = MiddlewareStack::new().with(Arc::new(ApprovalMiddleware::new(
        gate,
        &["delete".to_string()],
    )));
    let agent = AgentLoop::new(
        gateway,
        tools,
        middleware,
        Arc::new(InMemoryCheckpointStore::new()),
        AgentLoopConfig::default(),
    );
    (agent, invocations)
}

#[tokio::test]
async fn test_sensitive_call_is_intercepted() {
    let gate = ApprovalGate::new(Duration::from_secs(3600));
    let call = ToolCall::new("delete_record", json!({"id": 5}));
    let backend = ScriptedBackend::new("m0")
        .push_message(Message::assistant_with_tool_calls("", vec![call]))
        .push_text("The deletion needs approval first.");
    let (agent, invocations) = harness(backend, gate.clone());

    let ctx = RunContext::new("s1");
    let state = agent
        .run(vec![Message::human("Delete record 5")], &ctx, &None)
        .await
        .unwrap()
        .into_state();

    // The underlying tool never ran.
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    // The model saw a stub tool result.
    let tool_result = state
        .messages
        .iter()
        .find(|m| m.role == MessageRole::Tool)
        .unwrap();
    assert!(tool_result.content.starts_with("Approval required, id="));

    // And a pending record exists with the full action data.
    let pending = gate.list_pending(Some("s1")).await;
    assert_eq!(pending.len(), 1);
    let record = &pending[0];
    assert_eq!(record.action_type, "tool_execution");
    assert_eq!(record.status, ApprovalStatus::Pending);
    assert_eq!(record.action_data["name"], json!("delete_record"));
    assert_eq!(record.action_data["arguments"], json!({"id": 5}));
}

#[tokio::test]
async fn test_approved_resubmission_executes_tool() {
    let gate = ApprovalGate::new(Duration::from_secs(3600));
    let first_call = ToolCall::new("delete_record", json!({"id": 5}));
    let second_call = ToolCall::new("delete_record", json!({"id": 5}));
    let backend = ScriptedBackend::new("m0")
        .push_message(Message::assistant_with_tool_calls("", vec![first_call]))
        .push_text("Waiting for approval.")
        .push_message(Message::assistant_with_tool_calls("", vec![second_call]))
        .push_text("Record 5 deleted.");
    let (agent, invocations) = harness(backend, gate.clone());

    let ctx = RunContext::new("s1");
    agent
        .run(vec![Message::human("Delete record 5")], &ctx, &None)
        .await
        .unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    let pending = gate.list_pending(Some("s1")).await;
    gate.approve("s1", &pending[0].id, Some("go ahead".into()))
        .await
        .unwrap();

    let state = agent
        .run(vec![Message::human("Please retry the deletion")], &ctx, &None)
        .await
        .unwrap()
        .into_state();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(state.last().unwrap().content, "Record 5 deleted.");
    // The approval was consumed; a third emission would be intercepted anew.
    assert!(!gate.take_approved("s1", "delete_record", &json!({"id": 5})).await);
}

#[tokio::test]
async fn test_resolution_unblocks_waiter() {
    let gate = ApprovalGate::new(Duration::from_secs(60));
    let request = gate
        .create("s1", None, "test", "desc", json!({}), Some(Duration::from_secs(60)))
        .await;

    let waiter = {
        let gate = gate.clone();
        let id = request.id.clone();
        tokio::spawn(async move { gate.wait(&id, Some(Duration::from_secs(10))).await.unwrap() })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    gate.approve("s1", &request.id, Some("ok".into())).await.unwrap();

    let record = waiter.await.unwrap();
    assert_eq!(record.status, ApprovalStatus::Approved);
    assert_eq!(record.reviewer_comment.as_deref(), Some("ok"));
    assert!(record.resolved_at.is_some());

    // A later reject leaves the approved record untouched.
    let after = gate.reject("s1", &request.id, None).await.unwrap();
    assert_eq!(after.status, ApprovalStatus::Approved);
    assert_eq!(after.reviewer_comment.as_deref(), Some("ok"));
}

#[tokio::test]
async fn test_non_sensitive_tools_pass_through() {
    let gate = ApprovalGate::new(Duration::from_secs(3600));

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, args: Value, _ctx: &RunContext) -> cadence_core::Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    let gateway = Arc::new(
        LlmGateway::builder()
            .backend(Arc::new(
                ScriptedBackend::new("m0")
                    .push_message(Message::assistant_with_tool_calls(
                        "",
                        vec![ToolCall::new("echo", json!({"text": "hi"}))],
                    ))
                    .push_text("done"),
            ))
            .build()
            .unwrap(),
    );
    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(EchoTool));
    let agent = AgentLoop::new(
        gateway,
        tools,
        MiddlewareStack::new().with(Arc::new(ApprovalMiddleware::new(
            gate.clone(),
            &["delete".to_string()],
        ))),
        Arc::new(InMemoryCheckpointStore::new()),
        AgentLoopConfig::default(),
    );

    let ctx = RunContext::new("s1");
    let state = agent
        .run(vec![Message::human("say hi")], &ctx, &None)
        .await
        .unwrap()
        .into_state();

    let tool_result = state
        .messages
        .iter()
        .find(|m| m.role == MessageRole::Tool)
        .unwrap();
    assert_eq!(tool_result.content, "hi");
    assert!(gate.list_pending(None).await.is_empty());
}
