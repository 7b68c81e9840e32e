//! Observability probes: structured events and call-latency histograms.
//!
//! Neither middleware changes semantics; both delegate unconditionally.

use crate::error::Result;
use crate::middleware::{
    Middleware, ModelCallNext, ModelRequest, ToolCallNext, ToolCallRequest, ToolOutcome,
};
use async_trait::async_trait;
use cadence_llm::ChatResponse;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Emits structured events around each model call and tool call.
pub struct ObservabilityMiddleware;

#[async_trait]
impl Middleware for ObservabilityMiddleware {
    async fn wrap_model_call(
        &self,
        request: ModelRequest,
        next: ModelCallNext,
    ) -> Result<ChatResponse> {
        let session_id = request.ctx.session_id.clone();
        let started = Instant::now();
        info!(
            event = "model_call_started",
            session_id = %session_id,
            messages = request.messages.len(),
            tools = request.tools.len()
        );
        let result = next.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => info!(
                event = "model_call_completed",
                session_id = %session_id,
                model = %response.model,
                elapsed_ms,
                tool_calls = response.message.tool_calls.len()
            ),
            Err(err) => {
                info!(event = "model_call_failed", session_id = %session_id, elapsed_ms, error = %err)
            }
        }
        result
    }

    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: ToolCallNext,
    ) -> Result<ToolOutcome> {
        let name = request.call.name.clone();
        let id = request.call.id.clone();
        let started = Instant::now();
        info!(event = "tool_call_executing", name = %name, id = %id);
        let result = next.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(ToolOutcome::Result(_)) => {
                info!(event = "tool_call_completed", name = %name, id = %id, elapsed_ms)
            }
            Ok(ToolOutcome::Command(cmd)) => {
                info!(event = "tool_call_routed", name = %name, id = %id, goto = %cmd.goto)
            }
            Err(err) => info!(event = "tool_call_failed", name = %name, id = %id, error = %err),
        }
        result
    }
}

/// Fixed-bucket latency histogram in milliseconds.
#[derive(Debug, Clone)]
pub struct Histogram {
    bounds: Vec<u64>,
    counts: Vec<u64>,
    sum_ms: u64,
    count: u64,
}

impl Histogram {
    fn new() -> Self {
        let bounds = vec![50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000];
        let counts = vec![0; bounds.len() + 1];
        Self {
            bounds,
            counts,
            sum_ms: 0,
            count: 0,
        }
    }

    fn record(&mut self, elapsed_ms: u64) {
        let bucket = self
            .bounds
            .iter()
            .position(|&bound| elapsed_ms <= bound)
            .unwrap_or(self.bounds.len());
        self.counts[bucket] += 1;
        self.sum_ms += elapsed_ms;
        self.count += 1;
    }

    /// Observations recorded.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean latency in milliseconds, zero when empty.
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms as f64 / self.count as f64
        }
    }

    /// `(upper_bound_ms, count)` pairs; the final entry is the overflow
    /// bucket with `u64::MAX` as its bound.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        self.bounds
            .iter()
            .copied()
            .chain(std::iter::once(u64::MAX))
            .zip(self.counts.iter().copied())
            .collect()
    }
}

/// Records model-call wall time per model name.
#[derive(Default)]
pub struct MetricsMiddleware {
    histograms: Mutex<HashMap<String, Histogram>>,
}

impl MetricsMiddleware {
    /// Empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of every model's histogram.
    pub fn snapshot(&self) -> HashMap<String, Histogram> {
        self.histograms.lock().clone()
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn wrap_model_call(
        &self,
        request: ModelRequest,
        next: ModelCallNext,
    ) -> Result<ChatResponse> {
        let started = Instant::now();
        let result = next.run(request).await;
        if let Ok(response) = &result {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            self.histograms
                .lock()
                .entry(response.model.clone())
                .or_insert_with(Histogram::new)
                .record(elapsed_ms);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{MiddlewareStack, ModelTerminal};
    use cadence_core::{Message, RunContext};

    #[test]
    fn test_histogram_buckets_and_mean() {
        let mut histogram = Histogram::new();
        histogram.record(40);
        histogram.record(60);
        histogram.record(100_000);
        assert_eq!(histogram.count(), 3);

        let buckets = histogram.buckets();
        assert_eq!(buckets[0], (50, 1));
        assert_eq!(buckets[1], (100, 1));
        assert_eq!(buckets.last().unwrap(), &(u64::MAX, 1));
        assert!((histogram.mean_ms() - 33366.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_metrics_label_by_model_name() {
        let metrics = MetricsMiddleware::new();
        let stack = MiddlewareStack::new().with(metrics.clone());
        let terminal: ModelTerminal = Arc::new(|_request| {
            Box::pin(async { Ok(ChatResponse::new("m-fast", Message::assistant("ok"))) })
        });

        for _ in 0..3 {
            let request = ModelRequest {
                messages: vec![Message::human("hi")],
                tools: vec![],
                model: None,
                ctx: RunContext::new("s1"),
            };
            stack.model_call(request, terminal.clone()).await.unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["m-fast"].count(), 3);
    }
}
