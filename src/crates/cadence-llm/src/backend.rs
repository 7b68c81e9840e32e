//! Backend trait.

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse, ChatStream};
use async_trait::async_trait;

/// A single model backend.
///
/// Implementations convert the request into provider wire format, perform
/// one call, and classify failures into [`crate::LlmError`] so the gateway
/// can decide between retry, rotation and surfacing. Retry and fallback
/// live in the gateway, not here.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Name this backend answers to in the model ring.
    fn model_name(&self) -> &str;

    /// Perform one complete call.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Open a streaming call. The returned stream is finite and cannot be
    /// restarted; consumers drain it or drop it to cancel.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream>;
}
