//! Tool trait and registry.
//!
//! Tools are stateless from the core's point of view: they receive a
//! validated argument map and return a string, and any side effects live
//! behind them. The registry holds statically registered tools plus tools
//! discovered from external bridges, and serves role-filtered views.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_core::tool::{Tool, ToolRegistry};
//!
//! struct WebSearch;
//!
//! #[async_trait::async_trait]
//! impl Tool for WebSearch {
//!     fn name(&self) -> &str { "web_search" }
//!     fn description(&self) -> &str { "Search the web" }
//!     async fn invoke(&self, args: serde_json::Value, _ctx: &RunContext)
//!         -> cadence_core::Result<String> {
//!         Ok(format!("results for {}", args["q"]))
//!     }
//! }
//!
//! let registry = ToolRegistry::new();
//! registry.register(Arc::new(WebSearch));
//! let tool = registry.resolve("web_search", "user")?;
//! ```

use crate::context::RunContext;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// An invocable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Short description injected into the model's tool list.
    fn description(&self) -> &str;

    /// JSON schema for the argument map. Defaults to an open object.
    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    /// Whether invocations must pass the approval gate.
    fn is_sensitive(&self) -> bool {
        false
    }

    /// Role required to see and invoke this tool, if any.
    fn required_role(&self) -> Option<&str> {
        None
    }

    /// Execute the tool.
    async fn invoke(&self, args: Value, ctx: &RunContext) -> Result<String>;
}

/// LLM-facing description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,

    /// Tool description.
    pub description: String,

    /// Argument schema.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Build the descriptor for a tool.
    pub fn for_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

/// Registry of callable tools with role-filtered views.
///
/// Read-mostly: lookups take a read lock, registration swaps entries under
/// the write lock so in-flight requests keep a consistent view.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Idempotent on name; re-registration replaces.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().insert(name, tool);
    }

    /// Register several tools. Returns the number registered.
    pub fn register_all(&self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> usize {
        let mut map = self.tools.write();
        let mut count = 0;
        for tool in tools {
            map.insert(tool.name().to_string(), tool);
            count += 1;
        }
        count
    }

    /// Remove every tool whose name starts with `prefix`. Used when a bridge
    /// refresh replaces a namespace.
    pub fn remove_prefixed(&self, prefix: &str) -> usize {
        let mut map = self.tools.write();
        let names: Vec<String> = map
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        for name in &names {
            map.remove(name);
        }
        names.len()
    }

    fn visible_to(tool: &dyn Tool, role: &str) -> bool {
        match tool.required_role() {
            Some(required) => role == required,
            None => true,
        }
    }

    /// Resolve a tool by name for the given role.
    pub fn resolve(&self, name: &str, role: &str) -> Result<Arc<dyn Tool>> {
        let map = self.tools.read();
        let tool = map
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ToolNotFound(name.to_string()))?;
        if !Self::visible_to(tool.as_ref(), role) {
            return Err(CoreError::Forbidden {
                tool: name.to_string(),
                role: role.to_string(),
            });
        }
        Ok(tool)
    }

    /// All tools visible to a role, sorted by name.
    pub fn list(&self, role: &str) -> Vec<Arc<dyn Tool>> {
        let map = self.tools.read();
        let mut tools: Vec<Arc<dyn Tool>> = map
            .values()
            .filter(|tool| Self::visible_to(tool.as_ref(), role))
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// LLM-facing descriptors for a role, sorted by name.
    pub fn descriptors(&self, role: &str) -> Vec<ToolDescriptor> {
        self.list(role)
            .iter()
            .map(|tool| ToolDescriptor::for_tool(tool.as_ref()))
            .collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Validate `args` against the tool's parameter schema.
    ///
    /// Schema violations are permanent errors; the driver renders them as
    /// `Error:` tool results rather than retrying.
    pub fn validate_arguments(&self, tool: &dyn Tool, args: &Value) -> Result<()> {
        let schema = tool.parameters_schema();
        let compiled =
            jsonschema::JSONSchema::compile(&schema).map_err(|e| CoreError::InvalidArguments {
                tool: tool.name().to_string(),
                reason: format!("invalid schema: {e}"),
            })?;
        if let Err(errors) = compiled.validate(args) {
            let reason = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CoreError::InvalidArguments {
                tool: tool.name().to_string(),
                reason,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool {
        name: &'static str,
        role: Option<&'static str>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "echoes input"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        fn required_role(&self) -> Option<&str> {
            self.role
        }

        async fn invoke(&self, args: Value, _ctx: &RunContext) -> Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    #[test]
    fn test_register_is_idempotent_on_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool {
            name: "echo",
            role: None,
        }));
        registry.register(Arc::new(EchoTool {
            name: "echo",
            role: None,
        }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_not_found() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.resolve("missing", "user"),
            Err(CoreError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_role_gated_tool_is_hidden_and_forbidden() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool {
            name: "admin_echo",
            role: Some("admin"),
        }));

        assert!(registry.descriptors("user").is_empty());
        assert!(matches!(
            registry.resolve("admin_echo", "user"),
            Err(CoreError::Forbidden { .. })
        ));
        assert!(registry.resolve("admin_echo", "admin").is_ok());
    }

    #[test]
    fn test_validate_arguments_rejects_missing_field() {
        let registry = ToolRegistry::new();
        let tool = EchoTool {
            name: "echo",
            role: None,
        };
        assert!(registry.validate_arguments(&tool, &json!({"text": "hi"})).is_ok());
        assert!(matches!(
            registry.validate_arguments(&tool, &json!({})),
            Err(CoreError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_remove_prefixed_clears_bridge_namespace() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool {
            name: "bridge__a",
            role: None,
        }));
        registry.register(Arc::new(EchoTool {
            name: "bridge__b",
            role: None,
        }));
        registry.register(Arc::new(EchoTool {
            name: "local",
            role: None,
        }));
        assert_eq!(registry.remove_prefixed("bridge__"), 2);
        assert_eq!(registry.len(), 1);
    }
}
