//! Deterministic backend for tests and offline stubs.
//!
//! A [`ScriptedBackend`] replays a fixed sequence of replies or failures,
//! or computes replies from the request via [`ScriptedBackend::from_fn`].
//! Call counting and an in-flight high-water mark make retry budgets and
//! fan-out parallelism observable in tests.

use crate::backend::ChatBackend;
use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, ChatResponse, ChatStream, StreamChunk};
use async_trait::async_trait;
use cadence_core::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A cloneable failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Timeout,
    RateLimited,
    Upstream,
    Auth,
}

impl ScriptedFailure {
    fn into_error(self) -> LlmError {
        match self {
            ScriptedFailure::Timeout => LlmError::Timeout,
            ScriptedFailure::RateLimited => LlmError::RateLimited("scripted".into()),
            ScriptedFailure::Upstream => LlmError::Upstream("scripted".into()),
            ScriptedFailure::Auth => LlmError::Auth("scripted".into()),
        }
    }
}

enum Step {
    Reply(Message),
    Fail(ScriptedFailure),
}

type ReplyFn = dyn Fn(&ChatRequest) -> Message + Send + Sync;

/// Scripted [`ChatBackend`].
#[derive(Clone)]
pub struct ScriptedBackend {
    name: String,
    steps: Arc<Mutex<VecDeque<Step>>>,
    reply_fn: Option<Arc<ReplyFn>>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    /// A backend that replays queued steps, failing when the script runs dry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Arc::new(Mutex::new(VecDeque::new())),
            reply_fn: None,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend that computes every reply from the request.
    pub fn from_fn(
        name: impl Into<String>,
        reply: impl Fn(&ChatRequest) -> Message + Send + Sync + 'static,
    ) -> Self {
        let mut backend = Self::new(name);
        backend.reply_fn = Some(Arc::new(reply));
        backend
    }

    /// Queue a plain assistant reply.
    pub fn push_text(self, content: impl Into<String>) -> Self {
        self.steps
            .lock()
            .push_back(Step::Reply(Message::assistant(content)));
        self
    }

    /// Queue an arbitrary assistant message (e.g. carrying tool calls).
    pub fn push_message(self, message: Message) -> Self {
        self.steps.lock().push_back(Step::Reply(message));
        self
    }

    /// Queue a failure.
    pub fn push_failure(self, failure: ScriptedFailure) -> Self {
        self.steps.lock().push_back(Step::Fail(failure));
        self
    }

    /// Simulate call latency; lets tests observe overlap under fan-out.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Total calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous in-flight calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, request: &ChatRequest) -> Result<Message> {
        if let Some(step) = self.steps.lock().pop_front() {
            return match step {
                Step::Reply(message) => Ok(message),
                Step::Fail(failure) => Err(failure.into_error()),
            };
        }
        if let Some(reply) = &self.reply_fn {
            return Ok(reply(request));
        }
        Err(LlmError::InvalidRequest(format!(
            "scripted backend '{}' ran out of steps",
            self.name
        )))
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = self.next_step(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map(|message| ChatResponse::new(self.name.clone(), message))
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.chat(request).await?;
        let words: Vec<String> = response
            .message
            .content
            .split_inclusive(' ')
            .map(String::from)
            .collect();
        let stream = async_stream::stream! {
            for word in words {
                yield Ok(StreamChunk { content: word, finish_reason: None });
            }
            yield Ok(StreamChunk { content: String::new(), finish_reason: Some("stop".into()) });
        };
        Ok(Box::pin(stream))
    }
}
