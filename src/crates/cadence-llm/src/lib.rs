//! Uniform model gateway for cadence.
//!
//! One call surface over many backends: [`ChatBackend`] implementations do
//! single provider calls; [`LlmGateway`] layers per-backend retry with
//! exponential backoff, rotation across the configured model ring,
//! timeouts, concurrency caps and cooperative cancellation on top.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_llm::{LlmGateway, OpenAiCompatibleBackend, OpenAiConfig, RetryPolicy};
//!
//! let gateway = LlmGateway::builder()
//!     .backend(Arc::new(OpenAiCompatibleBackend::new(
//!         OpenAiConfig::new("https://api.openai.com/v1", key, "gpt-4o-mini"),
//!     )?))
//!     .retry(RetryPolicy::new(3))
//!     .build()?;
//!
//! let response = gateway.chat(request, &ctx).await?;
//! ```

pub mod backend;
pub mod error;
pub mod gateway;
pub mod openai;
pub mod retry;
pub mod scripted;
pub mod types;

pub use backend::ChatBackend;
pub use error::{LlmError, Result};
pub use gateway::{LlmGateway, LlmGatewayBuilder};
pub use openai::{OpenAiCompatibleBackend, OpenAiConfig};
pub use retry::RetryPolicy;
pub use scripted::{ScriptedBackend, ScriptedFailure};
pub use types::{ChatRequest, ChatResponse, ChatStream, GenerationParams, StreamChunk, Usage};
