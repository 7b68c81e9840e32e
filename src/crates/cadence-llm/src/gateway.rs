//! Model ring gateway.
//!
//! The gateway is the uniform call surface over an ordered, cyclic list of
//! backends. A call starts at the configured default (or an explicit
//! per-call model), retries that backend with exponential backoff on
//! transient failures, then rotates to the next ring member and restarts
//! the attempt budget there. Total calls per request never exceed
//! `backends × attempts`.
//!
//! Each slot carries its own timeout and a semaphore capping in-flight
//! calls, so one rate-limited provider cannot starve the others.

use crate::backend::ChatBackend;
use crate::error::{LlmError, Result};
use crate::retry::RetryPolicy;
use crate::types::{ChatRequest, ChatResponse, ChatStream};
use cadence_core::RunContext;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

struct BackendSlot {
    backend: Arc<dyn ChatBackend>,
    timeout: Duration,
    limiter: Arc<Semaphore>,
}

/// Uniform call surface over the model ring.
pub struct LlmGateway {
    slots: Vec<BackendSlot>,
    retry: RetryPolicy,
}

/// Builder for [`LlmGateway`]. Insertion order is ring order; the first
/// backend is the default entry point.
pub struct LlmGatewayBuilder {
    slots: Vec<BackendSlot>,
    retry: RetryPolicy,
    default_timeout: Duration,
    default_concurrency: usize,
}

impl LlmGatewayBuilder {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            retry: RetryPolicy::default(),
            default_timeout: Duration::from_secs(60),
            default_concurrency: 4,
        }
    }

    /// Append a backend with the builder's current defaults.
    pub fn backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.slots.push(BackendSlot {
            backend,
            timeout: self.default_timeout,
            limiter: Arc::new(Semaphore::new(self.default_concurrency)),
        });
        self
    }

    /// Append a backend with an explicit timeout and concurrency cap.
    pub fn backend_with_limits(
        mut self,
        backend: Arc<dyn ChatBackend>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        self.slots.push(BackendSlot {
            backend,
            timeout,
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
        });
        self
    }

    /// Set the per-backend retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set defaults applied by subsequent `backend` calls.
    pub fn defaults(mut self, timeout: Duration, concurrency: usize) -> Self {
        self.default_timeout = timeout;
        self.default_concurrency = concurrency.max(1);
        self
    }

    /// Finish. Fails when the ring is empty.
    pub fn build(self) -> Result<LlmGateway> {
        if self.slots.is_empty() {
            return Err(LlmError::InvalidRequest("model ring is empty".into()));
        }
        Ok(LlmGateway {
            slots: self.slots,
            retry: self.retry,
        })
    }
}

impl LlmGateway {
    /// Start building a gateway.
    pub fn builder() -> LlmGatewayBuilder {
        LlmGatewayBuilder::new()
    }

    /// Names in ring order.
    pub fn model_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.backend.model_name()).collect()
    }

    fn start_index(&self, model: Option<&str>) -> usize {
        model
            .and_then(|name| {
                self.slots
                    .iter()
                    .position(|slot| slot.backend.model_name() == name)
            })
            .unwrap_or(0)
    }

    fn effective_timeout(&self, slot: &BackendSlot, ctx: &RunContext) -> Duration {
        match ctx.remaining() {
            Some(remaining) => slot.timeout.min(remaining),
            None => slot.timeout,
        }
    }

    async fn call_slot(
        &self,
        slot: &BackendSlot,
        request: &ChatRequest,
        ctx: &RunContext,
    ) -> Result<ChatResponse> {
        let _permit = slot
            .limiter
            .acquire()
            .await
            .map_err(|_| LlmError::Upstream("backend limiter closed".into()))?;
        let timeout = self.effective_timeout(slot, ctx);

        tokio::select! {
            _ = ctx.cancellation.wait() => Err(LlmError::Cancelled),
            outcome = tokio::time::timeout(timeout, slot.backend.chat(request.clone())) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout),
                }
            }
        }
    }

    /// Perform a complete call with retry and ring rotation.
    pub async fn chat(&self, request: ChatRequest, ctx: &RunContext) -> Result<ChatResponse> {
        let start = self.start_index(request.model.as_deref());
        let ring_len = self.slots.len();
        let mut calls = 0usize;
        let mut last: Option<LlmError> = None;

        for offset in 0..ring_len {
            let slot = &self.slots[(start + offset) % ring_len];
            let model = slot.backend.model_name();

            for attempt in 0..self.retry.max_attempts {
                ctx.check_live()?;
                calls += 1;
                debug!(event = "model_call_started", model, attempt, calls);

                match self.call_slot(slot, &request, ctx).await {
                    Ok(response) => {
                        debug!(event = "model_call_completed", model, attempt);
                        return Ok(response);
                    }
                    Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
                    Err(err) if err.is_retriable() => {
                        warn!(event = "model_call_retrying", model, attempt, error = %err);
                        let retry_here = self.retry.should_retry(attempt);
                        last = Some(err);
                        if retry_here {
                            tokio::time::sleep(self.retry.delay(attempt)).await;
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
            warn!(event = "model_ring_rotating", rotated_from = model);
        }

        Err(LlmError::Exhausted {
            attempts: calls,
            last: last.map(|e| e.to_string()).unwrap_or_else(|| "unknown".into()),
        })
    }

    /// Open a streaming call.
    ///
    /// Retry and rotation apply to opening the stream only; once chunks
    /// flow, failures surface in-band and the sequence cannot restart.
    pub async fn stream(&self, request: ChatRequest, ctx: &RunContext) -> Result<ChatStream> {
        let start = self.start_index(request.model.as_deref());
        let ring_len = self.slots.len();
        let mut last: Option<LlmError> = None;

        for offset in 0..ring_len {
            let slot = &self.slots[(start + offset) % ring_len];

            for attempt in 0..self.retry.max_attempts {
                ctx.check_live()?;
                let permit = slot
                    .limiter
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| LlmError::Upstream("backend limiter closed".into()))?;

                match slot.backend.stream(request.clone()).await {
                    Ok(inner) => {
                        let cancel = ctx.cancellation.clone();
                        let guarded = async_stream::stream! {
                            let _permit = permit;
                            let mut inner = inner;
                            loop {
                                tokio::select! {
                                    _ = cancel.wait() => {
                                        yield Err(LlmError::Cancelled);
                                        break;
                                    }
                                    item = inner.next() => match item {
                                        Some(chunk) => yield chunk,
                                        None => break,
                                    }
                                }
                            }
                        };
                        return Ok(Box::pin(guarded));
                    }
                    Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
                    Err(err) if err.is_retriable() => {
                        let retry_here = self.retry.should_retry(attempt);
                        last = Some(err);
                        if retry_here {
                            tokio::time::sleep(self.retry.delay(attempt)).await;
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Err(LlmError::Exhausted {
            attempts: ring_len * self.retry.max_attempts,
            last: last.map(|e| e.to_string()).unwrap_or_else(|| "unknown".into()),
        })
    }
}
