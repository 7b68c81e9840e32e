//! Role-scoped tool filtering.

use crate::error::Result;
use crate::middleware::{Middleware, ModelCallNext, ModelRequest};
use async_trait::async_trait;
use cadence_llm::ChatResponse;

/// Restricts the tool set passed to the model by user role.
///
/// The default rule hides skill-creating and skill-mutating tools from
/// non-admin roles. Additional `(role_exception, tool_name)` rules can be
/// layered on at construction.
pub struct RoleToolFilter {
    /// Tool names visible only to `admin_role`.
    admin_only: Vec<String>,

    /// The role that bypasses the filter.
    admin_role: String,
}

impl RoleToolFilter {
    /// The default rule set.
    pub fn new() -> Self {
        Self {
            admin_only: vec!["create_skill".to_string(), "update_skill".to_string()],
            admin_role: "admin".to_string(),
        }
    }

    /// Add another admin-only tool name.
    pub fn with_admin_only(mut self, tool: impl Into<String>) -> Self {
        self.admin_only.push(tool.into());
        self
    }
}

impl Default for RoleToolFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for RoleToolFilter {
    async fn wrap_model_call(
        &self,
        mut request: ModelRequest,
        next: ModelCallNext,
    ) -> Result<ChatResponse> {
        if request.ctx.user_role != self.admin_role {
            request
                .tools
                .retain(|tool| !self.admin_only.contains(&tool.name));
        }
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{MiddlewareStack, ModelTerminal};
    use cadence_core::{Message, RunContext, ToolDescriptor};
    use serde_json::json;
    use std::sync::Arc;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        }
    }

    fn counting_terminal() -> (ModelTerminal, Arc<parking_lot::Mutex<Vec<String>>>) {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let terminal: ModelTerminal = Arc::new(move |request: ModelRequest| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                *seen.lock() = request.tools.iter().map(|t| t.name.clone()).collect();
                Ok(ChatResponse::new("m", Message::assistant("ok")))
            })
        });
        (terminal, seen)
    }

    #[tokio::test]
    async fn test_non_admin_loses_skill_mutators() {
        let stack = MiddlewareStack::new().with(Arc::new(RoleToolFilter::new()));
        let (terminal, seen) = counting_terminal();

        let request = ModelRequest {
            messages: vec![Message::human("hi")],
            tools: vec![
                descriptor("web_search"),
                descriptor("create_skill"),
                descriptor("update_skill"),
            ],
            model: None,
            ctx: RunContext::new("s1").with_role("user"),
        };
        stack.model_call(request, terminal).await.unwrap();
        assert_eq!(*seen.lock(), vec!["web_search".to_string()]);
    }

    #[tokio::test]
    async fn test_admin_sees_everything() {
        let stack = MiddlewareStack::new().with(Arc::new(RoleToolFilter::new()));
        let (terminal, seen) = counting_terminal();

        let request = ModelRequest {
            messages: vec![Message::human("hi")],
            tools: vec![descriptor("web_search"), descriptor("create_skill")],
            model: None,
            ctx: RunContext::new("s1").with_role("admin"),
        };
        stack.model_call(request, terminal).await.unwrap();
        assert_eq!(seen.lock().len(), 2);
    }
}
