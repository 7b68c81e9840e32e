//! Runtime configuration.
//!
//! One flat struct covering the gateway, driver, approval gate, compactor
//! and workflow knobs. Defaults mirror production settings; environment
//! variables override the deployment-specific fields.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_retry_attempts() -> usize {
    3
}

fn default_backoff_base() -> f64 {
    1.0
}

fn default_backend_timeout() -> u64 {
    60
}

fn default_backend_concurrency() -> usize {
    4
}

fn default_request_budget() -> u64 {
    600
}

fn default_cycle_cap() -> usize {
    25
}

fn default_summarization_trigger() -> usize {
    4000
}

fn default_summarization_keep() -> usize {
    20
}

fn default_approval_ttl() -> u64 {
    3600
}

fn default_approval_sweep_interval() -> u64 {
    60
}

fn default_sensitive_patterns() -> Vec<String> {
    [
        "delete",
        "modify",
        "update",
        "write",
        "execute_sql",
        "send_email",
        "create_skill",
        "update_skill",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// A worker definition in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// System directive the worker runs under.
    pub system_directive: String,

    /// One-line description shown to the supervisor and the planner.
    pub description: String,
}

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Default model; first choice in the ring.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Ordered, cyclic fallback sequence of backend model names.
    #[serde(default)]
    pub model_ring: Vec<String>,

    /// Attempts per backend before rotating the ring.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// Base wait in seconds for exponential backoff.
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_base_seconds: f64,

    /// Per-model-call timeout in seconds.
    #[serde(default = "default_backend_timeout")]
    pub per_backend_timeout_seconds: u64,

    /// Concurrency cap per backend.
    #[serde(default = "default_backend_concurrency")]
    pub per_backend_concurrency: usize,

    /// Total budget for one request in seconds.
    #[serde(default = "default_request_budget")]
    pub per_request_budget_seconds: u64,

    /// Maximum agent cycles per request.
    #[serde(default = "default_cycle_cap")]
    pub cycle_cap: usize,

    /// Token estimate above which the compactor runs.
    #[serde(default = "default_summarization_trigger")]
    pub summarization_trigger_tokens: usize,

    /// Messages kept verbatim by the compactor.
    #[serde(default = "default_summarization_keep")]
    pub summarization_keep_messages: usize,

    /// Model used for summaries; falls back to `default_model` when empty.
    #[serde(default)]
    pub summarization_model: Option<String>,

    /// Approval TTL in seconds.
    #[serde(default = "default_approval_ttl")]
    pub approval_ttl_seconds: u64,

    /// Interval of the expired-approval sweeper in seconds.
    #[serde(default = "default_approval_sweep_interval")]
    pub approval_sweep_interval_seconds: u64,

    /// Substring or regex patterns marking sensitive tool names.
    #[serde(default = "default_sensitive_patterns")]
    pub sensitive_tool_patterns: Vec<String>,

    /// Worker catalog: name to directive and description.
    #[serde(default)]
    pub worker_catalog: HashMap<String, WorkerConfig>,

    /// Directory holding YAML workflow templates.
    #[serde(default)]
    pub workflow_templates_path: Option<PathBuf>,

    /// JSON file enumerating external tool bridges.
    #[serde(default)]
    pub external_tool_bridge_config: Option<PathBuf>,

    /// Directory for auto-persisted skill bodies.
    #[serde(default)]
    pub skills_path: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            model_ring: Vec::new(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_base_seconds: default_backoff_base(),
            per_backend_timeout_seconds: default_backend_timeout(),
            per_backend_concurrency: default_backend_concurrency(),
            per_request_budget_seconds: default_request_budget(),
            cycle_cap: default_cycle_cap(),
            summarization_trigger_tokens: default_summarization_trigger(),
            summarization_keep_messages: default_summarization_keep(),
            summarization_model: None,
            approval_ttl_seconds: default_approval_ttl(),
            approval_sweep_interval_seconds: default_approval_sweep_interval(),
            sensitive_tool_patterns: default_sensitive_patterns(),
            worker_catalog: HashMap::new(),
            workflow_templates_path: None,
            external_tool_bridge_config: None,
            skills_path: None,
        }
    }
}

impl CoreConfig {
    /// Load defaults, then apply environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Override deployment-specific fields from the environment.
    ///
    /// Recognized: `CADENCE_DEFAULT_MODEL`, `CADENCE_MODEL_RING`
    /// (comma-separated), `CADENCE_TEMPLATES_PATH`, `CADENCE_BRIDGE_CONFIG`,
    /// `CADENCE_SKILLS_PATH`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("CADENCE_DEFAULT_MODEL") {
            self.default_model = model;
        }
        if let Ok(ring) = std::env::var("CADENCE_MODEL_RING") {
            self.model_ring = ring
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(path) = std::env::var("CADENCE_TEMPLATES_PATH") {
            self.workflow_templates_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("CADENCE_BRIDGE_CONFIG") {
            self.external_tool_bridge_config = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("CADENCE_SKILLS_PATH") {
            self.skills_path = Some(PathBuf::from(path));
        }
    }

    /// The full ring starting at the default model, deduplicated.
    pub fn effective_ring(&self) -> Vec<String> {
        let mut ring = vec![self.default_model.clone()];
        for model in &self.model_ring {
            if !ring.contains(model) {
                ring.push(model.clone());
            }
        }
        ring
    }

    /// Model used for history summaries.
    pub fn summarization_model(&self) -> &str {
        self.summarization_model
            .as_deref()
            .unwrap_or(&self.default_model)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.default_model.is_empty() {
            return Err(CoreError::InvalidConfig("default_model is empty".into()));
        }
        if self.retry_attempts == 0 {
            return Err(CoreError::InvalidConfig("retry_attempts must be > 0".into()));
        }
        if self.cycle_cap == 0 {
            return Err(CoreError::InvalidConfig("cycle_cap must be > 0".into()));
        }
        if self.summarization_keep_messages == 0 {
            return Err(CoreError::InvalidConfig(
                "summarization_keep_messages must be > 0".into(),
            ));
        }
        Ok(())
    }
}
