//! Declarative DAG workflows over the worker catalog.
//!
//! A request is planned into a [`WorkflowPlan`] (template, heuristic, LLM
//! synthesis or fallback), executed round by round with every eligible step
//! fanned out in parallel, and collapsed by the synthesizer into one
//! assistant message. State lives in [`WorkflowState`] and is checkpointed
//! at every round boundary under the `workflow` namespace.

pub mod error;
pub mod plan;
pub mod planner;
pub mod scheduler;
pub mod templates;

pub use error::{Result, WorkflowError};
pub use plan::{StepResult, WorkflowPlan, WorkflowState, WorkflowStep};
pub use planner::WorkflowPlanner;
pub use scheduler::{
    AgentWorkerRunner, SynthesizerMode, WorkerRunner, WorkflowScheduler,
};
pub use templates::{TemplateLibrary, WorkflowTemplate};
