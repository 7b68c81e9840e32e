//! External tool bridge.
//!
//! A bridge exposes tools the core did not ship with: `list_tools` returns
//! descriptors, `invoke` passes a call through. Descriptors are cached in
//! the registry at discovery time under `<bridge>__<tool>` names;
//! invocations go back through the bridge. Discovery runs at startup and on
//! explicit refresh, never on the request path.
//!
//! Bridges are enumerated in a JSON config file:
//!
//! ```json
//! {"bridges": [
//!   {"name": "search", "url": "http://localhost:9301", "enabled": true}
//! ]}
//! ```

use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use cadence_core::{CoreError, RunContext, Tool, ToolRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Tool metadata reported by a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "open_object")]
    pub parameters: Value,
}

fn open_object() -> Value {
    serde_json::json!({"type": "object"})
}

/// A connection to one external tool provider.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    /// Namespace prefix for this bridge's tools.
    fn name(&self) -> &str;

    /// Enumerate the bridge's tools.
    async fn list_tools(&self) -> Result<Vec<BridgeToolDescriptor>>;

    /// Invoke a tool by its un-namespaced name.
    async fn invoke(&self, name: &str, args: Value) -> Result<String>;
}

/// One entry of the bridge config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct BridgeSettings {
    #[serde(default)]
    bridges: Vec<BridgeEndpoint>,
}

/// Load enabled bridge endpoints from a JSON config file.
pub async fn load_bridge_endpoints(path: &Path) -> Result<Vec<BridgeEndpoint>> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        ServiceError::Config(format!("bridge config {}: {e}", path.display()))
    })?;
    let settings: BridgeSettings = serde_json::from_str(&text)?;
    Ok(settings
        .bridges
        .into_iter()
        .filter(|endpoint| endpoint.enabled)
        .collect())
}

/// HTTP JSON bridge: `GET {url}/tools` lists, `POST {url}/tools/{name}`
/// invokes with the argument object as the body.
pub struct HttpToolBridge {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpToolBridge {
    /// Connect to an endpoint.
    pub fn new(endpoint: &BridgeEndpoint) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::Bridge {
                bridge: endpoint.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            name: endpoint.name.clone(),
            url: endpoint.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn error(&self, reason: impl Into<String>) -> ServiceError {
        ServiceError::Bridge {
            bridge: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ToolBridge for HttpToolBridge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<BridgeToolDescriptor>> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            tools: Vec<BridgeToolDescriptor>,
        }

        let response = self
            .client
            .get(format!("{}/tools", self.url))
            .send()
            .await
            .map_err(|e| self.error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(self.error(format!("list_tools returned {}", response.status())));
        }
        let listing: Listing = response
            .json()
            .await
            .map_err(|e| self.error(e.to_string()))?;
        Ok(listing.tools)
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            output: Option<String>,
        }

        let response = self
            .client
            .post(format!("{}/tools/{name}", self.url))
            .json(&args)
            .send()
            .await
            .map_err(|e| self.error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(self.error(format!("invoke '{name}' returned {}", response.status())));
        }
        let text = response.text().await.map_err(|e| self.error(e.to_string()))?;
        // Either {"output": "..."} or a plain string body.
        match serde_json::from_str::<Reply>(&text) {
            Ok(Reply { output: Some(output) }) => Ok(output),
            _ => Ok(text),
        }
    }
}

/// A registry entry delegating to a bridge.
struct BridgedTool {
    bridge: Arc<dyn ToolBridge>,
    descriptor: BridgeToolDescriptor,
    qualified_name: String,
}

#[async_trait]
impl Tool for BridgedTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameters_schema(&self) -> Value {
        self.descriptor.parameters.clone()
    }

    async fn invoke(&self, args: Value, _ctx: &RunContext) -> cadence_core::Result<String> {
        self.bridge
            .invoke(&self.descriptor.name, args)
            .await
            .map_err(|e| CoreError::ToolExecution {
                tool: self.qualified_name.clone(),
                reason: e.to_string(),
            })
    }
}

/// The namespaced registry name for a bridge tool.
pub fn qualified_name(bridge: &str, tool: &str) -> String {
    format!("{bridge}__{tool}")
}

/// Pull a bridge's tools into the registry, replacing its namespace.
/// Returns the number registered.
pub async fn discover(registry: &ToolRegistry, bridge: Arc<dyn ToolBridge>) -> Result<usize> {
    let descriptors = match bridge.list_tools().await {
        Ok(descriptors) => descriptors,
        Err(err) => {
            warn!(event = "bridge_discovery_failed", bridge = bridge.name(), error = %err);
            return Err(err);
        }
    };

    registry.remove_prefixed(&qualified_name(bridge.name(), ""));
    let count = descriptors.len();
    for descriptor in descriptors {
        let qualified = qualified_name(bridge.name(), &descriptor.name);
        registry.register(Arc::new(BridgedTool {
            bridge: bridge.clone(),
            descriptor,
            qualified_name: qualified,
        }));
    }
    info!(event = "bridge_tools_discovered", bridge = bridge.name(), count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBridge;

    #[async_trait]
    impl ToolBridge for FakeBridge {
        fn name(&self) -> &str {
            "search"
        }

        async fn list_tools(&self) -> Result<Vec<BridgeToolDescriptor>> {
            Ok(vec![BridgeToolDescriptor {
                name: "lookup".into(),
                description: "Look something up".into(),
                parameters: open_object(),
            }])
        }

        async fn invoke(&self, name: &str, args: Value) -> Result<String> {
            Ok(format!("{name}: {args}"))
        }
    }

    #[tokio::test]
    async fn test_discover_registers_namespaced_tools() {
        let registry = ToolRegistry::new();
        let count = discover(&registry, Arc::new(FakeBridge)).await.unwrap();
        assert_eq!(count, 1);

        let tool = registry.resolve("search__lookup", "user").unwrap();
        let ctx = RunContext::new("s1");
        let output = tool
            .invoke(serde_json::json!({"q": "x"}), &ctx)
            .await
            .unwrap();
        assert!(output.starts_with("lookup:"));
    }

    #[tokio::test]
    async fn test_rediscovery_replaces_namespace() {
        let registry = ToolRegistry::new();
        discover(&registry, Arc::new(FakeBridge)).await.unwrap();
        discover(&registry, Arc::new(FakeBridge)).await.unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_load_endpoints_filters_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridges.json");
        tokio::fs::write(
            &path,
            r#"{"bridges": [
                {"name": "on", "url": "http://localhost:1"},
                {"name": "off", "url": "http://localhost:2", "enabled": false}
            ]}"#,
        )
        .await
        .unwrap();

        let endpoints = load_bridge_endpoints(&path).await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].name, "on");
    }
}
