//! System directive construction.
//!
//! The directive is a pure function of an explicit [`PromptContext`]: the
//! template, the skill index and any caller-provided memory context. The
//! middleware recomputes and re-injects it before every model call so the
//! model always sees the current skill catalog.

use crate::error::Result;
use crate::middleware::Middleware;
use crate::skills::SkillStore;
use async_trait::async_trait;
use cadence_core::{AgentState, Message, MessageRole, RunContext};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Inputs for one directive rendering.
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// Base instruction template.
    pub template: String,

    /// `(name, description)` pairs; bodies stay out of the prompt.
    pub skill_index: Vec<(String, String)>,

    /// Caller-provided memory text.
    pub memory: Option<String>,

    /// Role of the requesting user.
    pub user_role: String,

    /// Rendering time.
    pub timestamp: DateTime<Utc>,
}

/// Render the directive text.
pub fn build_directive(ctx: &PromptContext) -> String {
    let mut directive = ctx.template.clone();

    if !ctx.skill_index.is_empty() {
        directive.push_str("\n\n## Available skills\n");
        directive.push_str("Call load_skill to read a skill's full content.\n");
        for (name, description) in &ctx.skill_index {
            directive.push_str(&format!("- {name}: {description}\n"));
        }
    }

    if let Some(memory) = &ctx.memory {
        if !memory.is_empty() {
            directive.push_str("\n\n## Memory\n");
            directive.push_str(memory);
        }
    }

    directive.push_str(&format!(
        "\n\nCurrent time: {}. User role: {}.",
        ctx.timestamp.format("%Y-%m-%d %H:%M UTC"),
        ctx.user_role
    ));
    directive
}

/// Middleware injecting the directive as the leading system message.
pub struct SystemDirectiveMiddleware {
    template: String,
    skills: Arc<SkillStore>,
    memory: Option<String>,
}

impl SystemDirectiveMiddleware {
    /// Directive from a template and the live skill index.
    pub fn new(template: impl Into<String>, skills: Arc<SkillStore>) -> Self {
        Self {
            template: template.into(),
            skills,
            memory: None,
        }
    }

    /// Attach caller-provided memory context.
    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }
}

#[async_trait]
impl Middleware for SystemDirectiveMiddleware {
    async fn before_model(&self, state: &mut AgentState, ctx: &RunContext) -> Result<()> {
        let prompt_ctx = PromptContext {
            template: self.template.clone(),
            skill_index: self.skills.index().await,
            memory: self.memory.clone(),
            user_role: ctx.user_role.clone(),
            timestamp: Utc::now(),
        };
        let directive = build_directive(&prompt_ctx);

        match state.messages.first_mut() {
            Some(first) if first.role == MessageRole::System => {
                first.content = directive;
            }
            _ => {
                state.messages.insert(0, Message::system(directive));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{Skill, SkillSource};

    #[test]
    fn test_directive_contains_skill_index_not_bodies() {
        let ctx = PromptContext {
            template: "You are helpful.".into(),
            skill_index: vec![("deploy".into(), "how to deploy".into())],
            memory: None,
            user_role: "user".into(),
            timestamp: Utc::now(),
        };
        let directive = build_directive(&ctx);
        assert!(directive.contains("deploy: how to deploy"));
        assert!(directive.starts_with("You are helpful."));
    }

    #[tokio::test]
    async fn test_before_model_replaces_leading_system_message() {
        let skills = Arc::new(SkillStore::new());
        skills
            .insert(Skill::new("s", "desc", "body", SkillSource::Manual))
            .await;
        let middleware = SystemDirectiveMiddleware::new("Base.", skills);

        let mut state = AgentState::new();
        state.push(Message::system("stale"));
        state.push(Message::human("hi"));

        let ctx = RunContext::new("sess");
        middleware.before_model(&mut state, &ctx).await.unwrap();
        middleware.before_model(&mut state, &ctx).await.unwrap();

        // Still exactly one system message, refreshed in place.
        let system_count = state
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .count();
        assert_eq!(system_count, 1);
        assert!(state.messages[0].content.contains("s: desc"));
        assert!(!state.messages[0].content.contains("body"));
    }
}
