//! Plan and execution-state model.
//!
//! A plan is a DAG of steps, each routed to a named worker with a task
//! string. Step ids are unique and `depends_on` may reference only steps
//! declared earlier, which makes every valid plan acyclic by construction.
//! Results merge into the shared state by step id; the merge is a
//! commutative keyed union, so the completion order of parallel tasks never
//! changes the outcome. Duplicate step ids are an error, not an overwrite.

use crate::error::{Result, WorkflowError};
use cadence_core::Message;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One unit of delegated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique id within the plan.
    pub id: String,

    /// Worker that executes the step.
    pub worker: String,

    /// Task text handed to the worker.
    pub task: String,

    /// Ids of steps whose outputs this step consumes.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A validated DAG of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    /// Plan name, template name or `"synthesized"`.
    pub name: String,

    /// Planner rationale; informational only.
    #[serde(default)]
    pub reasoning: String,

    /// Steps in declaration order.
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowPlan {
    /// The one-step fallback plan.
    pub fn single_step(worker: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: "fallback".to_string(),
            reasoning: "single-step fallback".to_string(),
            steps: vec![WorkflowStep {
                id: "task".to_string(),
                worker: worker.into(),
                task: task.into(),
                depends_on: Vec::new(),
            }],
        }
    }

    /// Enforce the plan invariants: at least one step, unique ids, and
    /// dependencies referencing only previously declared steps.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidPlan("plan has no steps".into()));
        }
        let mut declared: BTreeSet<&str> = BTreeSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(WorkflowError::InvalidPlan("step with empty id".into()));
            }
            if step.worker.is_empty() {
                return Err(WorkflowError::InvalidPlan(format!(
                    "step '{}' has no worker",
                    step.id
                )));
            }
            if !declared.insert(&step.id) {
                return Err(WorkflowError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            for dep in &step.depends_on {
                if dep == &step.id || !declared.contains(dep.as_str()) {
                    return Err(WorkflowError::InvalidPlan(format!(
                        "step '{}' depends on undeclared step '{}'",
                        step.id, dep
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every step id in declaration order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }
}

/// One committed step outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub worker: String,
    pub task: String,
    pub output: String,
}

impl StepResult {
    /// Whether the worker failed; dependents still run and see this text.
    pub fn is_error(&self) -> bool {
        self.output.starts_with("Error:")
    }
}

/// Shared state of one workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Conversation history, including the final synthesis.
    pub messages: Vec<Message>,

    /// The active plan, set by the planner node.
    pub plan: Option<WorkflowPlan>,

    /// Committed results keyed by step id. Grows only.
    pub completed: BTreeMap<String, StepResult>,

    /// Rounds executed so far.
    pub current_round: u32,

    /// Output of the synthesizer once the plan is exhausted.
    pub final_output: Option<String>,
}

impl WorkflowState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit one result. Duplicate step ids are an error; the merge is a
    /// keyed set union, so insertion order is irrelevant.
    pub fn merge_result(&mut self, result: StepResult) -> Result<()> {
        if self.completed.contains_key(&result.step_id) {
            return Err(WorkflowError::DuplicateStepResult(result.step_id));
        }
        self.completed.insert(result.step_id.clone(), result);
        Ok(())
    }

    /// Ids of committed steps.
    pub fn completed_ids(&self) -> BTreeSet<&str> {
        self.completed.keys().map(String::as_str).collect()
    }

    /// Whether every plan step has a committed result.
    pub fn is_complete(&self) -> bool {
        match &self.plan {
            Some(plan) => plan
                .steps
                .iter()
                .all(|step| self.completed.contains_key(&step.id)),
            None => false,
        }
    }

    /// Steps whose dependencies are satisfied and that have not run yet.
    pub fn eligible(&self) -> Vec<WorkflowStep> {
        let Some(plan) = &self.plan else {
            return Vec::new();
        };
        plan.steps
            .iter()
            .filter(|step| !self.completed.contains_key(&step.id))
            .filter(|step| {
                step.depends_on
                    .iter()
                    .all(|dep| self.completed.contains_key(dep))
            })
            .cloned()
            .collect()
    }

    /// Concatenated outputs of a step's dependencies, in dependency order.
    pub fn dependency_context(&self, step: &WorkflowStep) -> Option<String> {
        if step.depends_on.is_empty() {
            return None;
        }
        let sections: Vec<String> = step
            .depends_on
            .iter()
            .filter_map(|dep| self.completed.get(dep))
            .map(|result| format!("### Result of step '{}'\n{}", result.step_id, result.output))
            .collect();
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}
