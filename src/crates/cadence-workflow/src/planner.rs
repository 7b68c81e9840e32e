//! Plan sourcing.
//!
//! Precedence: explicit template name, then heuristic template match, then
//! LLM synthesis, then the single-step fallback. The LLM planner is
//! prompted with the worker catalog and must return a JSON object shaped
//! like [`WorkflowPlan`]; parse failures and invariant violations fall
//! through to the fallback rather than failing the request.

use crate::plan::WorkflowPlan;
use crate::templates::TemplateLibrary;
use cadence_agents::WorkerCatalog;
use cadence_core::{Message, RunContext};
use cadence_llm::{ChatRequest, LlmGateway};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Produces a validated plan for a user message.
pub struct WorkflowPlanner {
    gateway: Arc<LlmGateway>,
    templates: Arc<TemplateLibrary>,
    catalog: Arc<WorkerCatalog>,
    planner_model: Option<String>,
    fallback_worker: String,
}

impl WorkflowPlanner {
    /// Assemble a planner.
    pub fn new(
        gateway: Arc<LlmGateway>,
        templates: Arc<TemplateLibrary>,
        catalog: Arc<WorkerCatalog>,
    ) -> Self {
        Self {
            gateway,
            templates,
            catalog,
            planner_model: None,
            fallback_worker: "coder".to_string(),
        }
    }

    /// Use a specific model for synthesis.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.planner_model = Some(model.into());
        self
    }

    /// Worker used by the single-step fallback.
    pub fn with_fallback_worker(mut self, worker: impl Into<String>) -> Self {
        self.fallback_worker = worker.into();
        self
    }

    fn synthesis_prompt(&self, user_message: &str) -> String {
        let mut workers = String::new();
        for name in self.catalog.names() {
            if let Some(worker) = self.catalog.get(&name) {
                workers.push_str(&format!("- {}: {}\n", worker.name, worker.description));
            }
        }
        format!(
            "Decompose the request below into a workflow plan. Respond with \
             ONLY a JSON object of the shape:\n\
             {{\"name\": str, \"reasoning\": str, \"steps\": [{{\"id\": str, \
             \"worker\": str, \"task\": str, \"depends_on\": [str]}}]}}\n\
             Rules: step ids are unique; depends_on lists only earlier step \
             ids; use only these workers:\n{workers}\n\
             Request: {user_message}"
        )
    }

    /// Pull the first JSON object out of a model reply that may be wrapped
    /// in prose or a code fence.
    fn extract_json(text: &str) -> Option<&str> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        (end > start).then(|| &text[start..=end])
    }

    async fn synthesize(&self, user_message: &str, ctx: &RunContext) -> Option<WorkflowPlan> {
        let prompt = self.synthesis_prompt(user_message);
        let mut request = ChatRequest::new(vec![Message::human(prompt)]);
        request.model = self.planner_model.clone();

        let response = match self.gateway.chat(request, ctx).await {
            Ok(response) => response,
            Err(err) => {
                warn!(event = "plan_synthesis_failed", error = %err);
                return None;
            }
        };

        let json = Self::extract_json(&response.message.content)?;
        let plan: WorkflowPlan = match serde_json::from_str(json) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(event = "plan_parse_failed", error = %err);
                return None;
            }
        };
        if let Err(err) = plan.validate() {
            warn!(event = "plan_invalid", error = %err);
            return None;
        }
        // Reject plans that route to workers we do not have.
        for step in &plan.steps {
            if self.catalog.get(&step.worker).is_none() {
                warn!(event = "plan_unknown_worker", worker = %step.worker);
                return None;
            }
        }
        Some(plan)
    }

    /// Produce a plan, walking the precedence chain.
    pub async fn plan(
        &self,
        template_name: Option<&str>,
        user_message: &str,
        ctx: &RunContext,
    ) -> WorkflowPlan {
        if let Some(name) = template_name {
            if let Some(template) = self.templates.get(name) {
                info!(event = "plan_from_template", name = %name);
                return template.plan();
            }
            warn!(event = "template_not_found", name = %name);
        }

        if let Some(template) = self.templates.match_heuristic(user_message) {
            info!(event = "plan_from_heuristic", name = %template.name);
            return template.plan();
        }

        if !self.catalog.is_empty() {
            if let Some(plan) = self.synthesize(user_message, ctx).await {
                info!(event = "plan_synthesized", steps = plan.steps.len());
                return plan;
            }
        }

        debug!(event = "plan_fallback", worker = %self.fallback_worker);
        WorkflowPlan::single_step(&self.fallback_worker, user_message)
    }
}
