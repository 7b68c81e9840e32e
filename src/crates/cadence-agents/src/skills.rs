//! Skill store and the built-in tool set.
//!
//! A skill is a named markdown body with a short description. Only
//! descriptions are injected into the system directive; bodies are fetched
//! on demand through the `load_skill` tool. Creation and mutation are
//! sensitive, admin-gated operations. When a directory is configured,
//! bodies are mirrored to one markdown file per skill name.

use crate::error::Result;
use async_trait::async_trait;
use cadence_core::{CoreError, RunContext, Tool};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Where a skill came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillSource {
    Manual,
    Conversation,
    Agent,
}

/// A named, versioned instruction document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: u32,
    pub source: SkillSource,
    pub auto_generated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Skill {
    /// Create a version-1 skill.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
        source: SkillSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            content: content.into(),
            tags: Vec::new(),
            version: 1,
            source,
            auto_generated: source == SkillSource::Agent,
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-memory skill registry with optional file mirroring.
pub struct SkillStore {
    skills: RwLock<HashMap<String, Skill>>,
    dir: Option<PathBuf>,
}

impl SkillStore {
    /// Memory-only store.
    pub fn new() -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
            dir: None,
        }
    }

    /// Store mirroring bodies to `dir/<name>.md`.
    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
            dir: Some(dir),
        }
    }

    /// Load persisted skills from the configured directory. Missing
    /// directory is not an error; a fresh deployment has no skills yet.
    pub async fn load_persisted(&self) -> Result<usize> {
        let Some(dir) = &self.dir else {
            return Ok(0);
        };
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };

        let mut loaded = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                warn!(event = "skill_file_unreadable", path = %path.display());
                continue;
            };
            // First non-empty line, minus any heading marker, doubles as the
            // description for persisted bodies.
            let description = content
                .lines()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim_start_matches('#').trim().to_string())
                .unwrap_or_default();
            let skill = Skill::new(name, description, content, SkillSource::Manual);
            self.skills.write().await.insert(skill.name.clone(), skill);
            loaded += 1;
        }
        debug!(event = "skills_loaded", count = loaded);
        Ok(loaded)
    }

    async fn persist(&self, skill: &Skill) {
        let Some(dir) = &self.dir else {
            return;
        };
        if tokio::fs::create_dir_all(dir).await.is_err() {
            warn!(event = "skill_dir_create_failed", dir = %dir.display());
            return;
        }
        let path = dir.join(format!("{}.md", skill.name));
        if let Err(e) = tokio::fs::write(&path, &skill.content).await {
            warn!(event = "skill_persist_failed", path = %path.display(), error = %e);
        }
    }

    /// Fetch one skill.
    pub async fn get(&self, name: &str) -> Option<Skill> {
        self.skills.read().await.get(name).cloned()
    }

    /// Insert a new skill or replace an existing one wholesale.
    pub async fn insert(&self, skill: Skill) {
        self.persist(&skill).await;
        self.skills.write().await.insert(skill.name.clone(), skill);
    }

    /// Apply a content/description delta, bumping version and timestamp.
    pub async fn update(
        &self,
        name: &str,
        description: Option<String>,
        content: Option<String>,
    ) -> Option<Skill> {
        let updated = {
            let mut skills = self.skills.write().await;
            let skill = skills.get_mut(name)?;
            if let Some(description) = description {
                skill.description = description;
            }
            if let Some(content) = content {
                skill.content = content;
            }
            skill.version += 1;
            skill.updated_at = Utc::now();
            skill.clone()
        };
        self.persist(&updated).await;
        Some(updated)
    }

    /// `(name, description)` pairs, sorted by name. This is the only part
    /// of a skill that reaches the system directive.
    pub async fn index(&self) -> Vec<(String, String)> {
        let skills = self.skills.read().await;
        let mut index: Vec<(String, String)> = skills
            .values()
            .map(|s| (s.name.clone(), s.description.clone()))
            .collect();
        index.sort();
        index
    }

    /// Number of stored skills.
    pub async fn len(&self) -> usize {
        self.skills.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.skills.read().await.is_empty()
    }
}

impl Default for SkillStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One retrieved knowledge fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub content: String,
    pub score: f32,
    pub source: String,
}

/// External retrieval seam. The aggregation across providers lives outside
/// the core; this is the one call the core depends on.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> cadence_core::Result<Vec<KnowledgeHit>>;
}

fn invoke_err(tool: &str, reason: impl Into<String>) -> CoreError {
    CoreError::ToolExecution {
        tool: tool.to_string(),
        reason: reason.into(),
    }
}

fn required_str<'a>(tool: &str, args: &'a Value, key: &str) -> cadence_core::Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing '{key}'"),
        })
}

/// `load_skill`: fetch a skill body on demand.
pub struct LoadSkillTool {
    store: Arc<SkillStore>,
}

#[async_trait]
impl Tool for LoadSkillTool {
    fn name(&self) -> &str {
        "load_skill"
    }

    fn description(&self) -> &str {
        "Load the full content of a named skill"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        })
    }

    async fn invoke(&self, args: Value, _ctx: &RunContext) -> cadence_core::Result<String> {
        let name = required_str(self.name(), &args, "name")?;
        match self.store.get(name).await {
            Some(skill) => Ok(skill.content),
            None => Err(invoke_err(self.name(), format!("no skill named '{name}'"))),
        }
    }
}

/// `list_skills`: names and descriptions only.
pub struct ListSkillsTool {
    store: Arc<SkillStore>,
}

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "List available skills with their descriptions"
    }

    async fn invoke(&self, _args: Value, _ctx: &RunContext) -> cadence_core::Result<String> {
        let index = self.store.index().await;
        if index.is_empty() {
            return Ok("No skills available.".to_string());
        }
        Ok(index
            .iter()
            .map(|(name, description)| format!("- {name}: {description}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// `create_skill`: sensitive, admin-only.
pub struct CreateSkillTool {
    store: Arc<SkillStore>,
}

#[async_trait]
impl Tool for CreateSkillTool {
    fn name(&self) -> &str {
        "create_skill"
    }

    fn description(&self) -> &str {
        "Create a new skill from an instruction"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "content": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["name", "description", "content"]
        })
    }

    fn is_sensitive(&self) -> bool {
        true
    }

    fn required_role(&self) -> Option<&str> {
        Some("admin")
    }

    async fn invoke(&self, args: Value, _ctx: &RunContext) -> cadence_core::Result<String> {
        let name = required_str(self.name(), &args, "name")?.to_string();
        if self.store.get(&name).await.is_some() {
            return Err(invoke_err(self.name(), format!("skill '{name}' already exists")));
        }
        let description = required_str(self.name(), &args, "description")?.to_string();
        let content = required_str(self.name(), &args, "content")?.to_string();

        let mut skill = Skill::new(&name, description, content, SkillSource::Agent);
        if let Some(tags) = args.get("tags").and_then(Value::as_array) {
            skill.tags = tags
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
        }
        self.store.insert(skill).await;
        Ok(format!("Created skill '{name}'."))
    }
}

/// `update_skill`: sensitive, admin-only.
pub struct UpdateSkillTool {
    store: Arc<SkillStore>,
}

#[async_trait]
impl Tool for UpdateSkillTool {
    fn name(&self) -> &str {
        "update_skill"
    }

    fn description(&self) -> &str {
        "Update an existing skill's description or content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["name"]
        })
    }

    fn is_sensitive(&self) -> bool {
        true
    }

    fn required_role(&self) -> Option<&str> {
        Some("admin")
    }

    async fn invoke(&self, args: Value, _ctx: &RunContext) -> cadence_core::Result<String> {
        let name = required_str(self.name(), &args, "name")?;
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .map(String::from);
        let content = args.get("content").and_then(Value::as_str).map(String::from);

        match self.store.update(name, description, content).await {
            Some(skill) => Ok(format!("Updated skill '{}' to version {}.", name, skill.version)),
            None => Err(invoke_err(self.name(), format!("no skill named '{name}'"))),
        }
    }
}

/// `retrieve_knowledge`: delegate to the external retriever.
pub struct RetrieveKnowledgeTool {
    retriever: Arc<dyn KnowledgeRetriever>,
}

#[async_trait]
impl Tool for RetrieveKnowledgeTool {
    fn name(&self) -> &str {
        "retrieve_knowledge"
    }

    fn description(&self) -> &str {
        "Retrieve relevant knowledge fragments for a query"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "k": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value, _ctx: &RunContext) -> cadence_core::Result<String> {
        let query = required_str(self.name(), &args, "query")?;
        let k = args.get("k").and_then(Value::as_u64).unwrap_or(5) as usize;
        let hits = self.retriever.retrieve(query, k).await?;
        if hits.is_empty() {
            return Ok("No relevant knowledge found.".to_string());
        }
        Ok(hits
            .iter()
            .map(|hit| format!("[{}] ({:.2}) {}", hit.source, hit.score, hit.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// The built-in tool set the core ships with.
pub fn builtin_tools(
    store: Arc<SkillStore>,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(LoadSkillTool {
            store: store.clone(),
        }),
        Arc::new(ListSkillsTool {
            store: store.clone(),
        }),
        Arc::new(CreateSkillTool {
            store: store.clone(),
        }),
        Arc::new(UpdateSkillTool { store }),
    ];
    if let Some(retriever) = retriever {
        tools.push(Arc::new(RetrieveKnowledgeTool { retriever }));
    }
    tools
}
