//! Shared model for the cadence orchestration runtime.
//!
//! This crate holds the types every other cadence crate speaks:
//!
//! - [`messages`] - the append-only conversation model
//! - [`tool`] - the tool trait and role-aware registry
//! - [`context`] - the per-request [`RunContext`] with cancellation
//! - [`signal`] - the one-shot [`CompletionSignal`] latch
//! - [`events`] - the streamed [`AgentEvent`] vocabulary
//! - [`config`] - the [`CoreConfig`] knobs
//!
//! It deliberately contains no I/O beyond tool invocation itself; drivers,
//! stores and gateways live in the sibling crates.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod messages;
pub mod signal;
pub mod tool;

pub use config::{CoreConfig, WorkerConfig};
pub use context::RunContext;
pub use error::{CoreError, Result};
pub use events::{emit, AgentEvent, EventSink};
pub use messages::{AgentState, Message, MessageRole, ToolCall};
pub use signal::CompletionSignal;
pub use tool::{Tool, ToolDescriptor, ToolRegistry};
