//! Agent loop driver, middleware stack, approval gate and routing.
//!
//! This crate turns the shared model of `cadence-core` into running agents:
//!
//! - [`middleware`] - the four-hook [`Middleware`] trait and the ordered
//!   onion [`MiddlewareStack`]
//! - built-in layers: [`SystemDirectiveMiddleware`], [`HistoryCompactor`],
//!   [`RoleToolFilter`], [`ObservabilityMiddleware`], [`MetricsMiddleware`],
//!   [`ApprovalMiddleware`]
//! - [`driver`] - the checkpointing reason-act loop
//! - [`approval`] - the blocking human-in-the-loop gate
//! - [`router`] - supervisor/worker handoff routing
//! - [`skills`] - the skill store and built-in tool set

pub mod approval;
pub mod compaction;
pub mod driver;
pub mod error;
pub mod middleware;
pub mod observe;
pub mod prompt;
pub mod role_filter;
pub mod router;
pub mod skills;

pub use approval::{
    ApprovalGate, ApprovalMiddleware, ApprovalRequest, ApprovalStatus, SensitiveMatcher,
};
pub use compaction::HistoryCompactor;
pub use driver::{
    gateway_terminal, registry_terminal, AgentLoop, AgentLoopConfig, LoopOutcome, SessionLocks,
};
pub use error::{AgentError, Result};
pub use middleware::{
    Command, Middleware, MiddlewareStack, ModelCallNext, ModelRequest, ModelTerminal,
    ToolCallNext, ToolCallRequest, ToolOutcome, ToolTerminal,
};
pub use observe::{Histogram, MetricsMiddleware, ObservabilityMiddleware};
pub use prompt::{build_directive, PromptContext, SystemDirectiveMiddleware};
pub use role_filter::RoleToolFilter;
pub use router::{HandoffRouting, MultiAgentRouter, WorkerCatalog, WorkerDefinition};
pub use skills::{
    builtin_tools, KnowledgeHit, KnowledgeRetriever, Skill, SkillSource, SkillStore,
};
