//! YAML workflow templates.
//!
//! A template pairs a name and description with a ready-made plan. The
//! library loads every `.yaml`/`.yml` file from the configured directory at
//! startup; files that fail to parse or validate are skipped with a
//! warning rather than failing boot.
//!
//! ```yaml
//! name: research-and-summarize
//! description: Research a topic in parallel, then summarize
//! steps:
//!   - id: gather
//!     worker: researcher
//!     task: Collect sources on the topic
//!   - id: summarize
//!     worker: analyst
//!     task: Summarize the findings
//!     depends_on: [gather]
//! ```

use crate::error::{Result, WorkflowError};
use crate::plan::WorkflowPlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// A named, reusable plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<crate::plan::WorkflowStep>,
}

impl WorkflowTemplate {
    /// Instantiate the template's plan.
    pub fn plan(&self) -> WorkflowPlan {
        WorkflowPlan {
            name: self.name.clone(),
            reasoning: format!("template '{}'", self.name),
            steps: self.steps.clone(),
        }
    }
}

/// Loaded template collection.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, WorkflowTemplate>,
}

impl TemplateLibrary {
    /// Empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every template from a directory. A missing directory yields an
    /// empty library.
    pub async fn load_dir(path: &Path) -> Result<Self> {
        let mut library = Self::new();
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(_) => return Ok(library),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkflowError::Template(e.to_string()))?
        {
            let file = entry.path();
            let extension = file.extension().and_then(|e| e.to_str());
            if !matches!(extension, Some("yaml") | Some("yml")) {
                continue;
            }
            let text = match tokio::fs::read_to_string(&file).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(event = "template_unreadable", path = %file.display(), error = %e);
                    continue;
                }
            };
            match library.insert_yaml(&text) {
                Ok(name) => info!(event = "template_loaded", name = %name),
                Err(e) => {
                    warn!(event = "template_invalid", path = %file.display(), error = %e)
                }
            }
        }
        Ok(library)
    }

    /// Parse, validate and insert one YAML template. Returns its name.
    pub fn insert_yaml(&mut self, yaml: &str) -> Result<String> {
        let template: WorkflowTemplate =
            serde_yaml::from_str(yaml).map_err(|e| WorkflowError::Template(e.to_string()))?;
        template.plan().validate()?;
        let name = template.name.clone();
        self.templates.insert(name.clone(), template);
        Ok(name)
    }

    /// Insert a prebuilt template.
    pub fn insert(&mut self, template: WorkflowTemplate) -> Result<()> {
        template.plan().validate()?;
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Fetch by exact name.
    pub fn get(&self, name: &str) -> Option<&WorkflowTemplate> {
        self.templates.get(name)
    }

    /// `(name, description)` pairs in name order.
    pub fn list(&self) -> Vec<(String, String)> {
        self.templates
            .values()
            .map(|t| (t.name.clone(), t.description.clone()))
            .collect()
    }

    /// Heuristic match: the first template whose name or description words
    /// all occur in the message.
    pub fn match_heuristic(&self, message: &str) -> Option<&WorkflowTemplate> {
        let haystack = message.to_lowercase();
        self.templates.values().find(|template| {
            let name_hit = haystack.contains(&template.name.to_lowercase().replace('-', " "))
                || haystack.contains(&template.name.to_lowercase());
            let description_hit = !template.description.is_empty()
                && template
                    .description
                    .to_lowercase()
                    .split_whitespace()
                    .filter(|word| word.len() > 3)
                    .all(|word| haystack.contains(word));
            name_hit || description_hit
        })
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the library is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESEARCH_YAML: &str = r#"
name: research-and-summarize
description: research a topic then summarize findings
steps:
  - id: gather
    worker: researcher
    task: Collect sources
  - id: summarize
    worker: analyst
    task: Summarize findings
    depends_on: [gather]
"#;

    #[test]
    fn test_insert_yaml_and_get() {
        let mut library = TemplateLibrary::new();
        let name = library.insert_yaml(RESEARCH_YAML).unwrap();
        assert_eq!(name, "research-and-summarize");

        let template = library.get(&name).unwrap();
        assert_eq!(template.steps.len(), 2);
        assert!(template.plan().validate().is_ok());
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        let mut library = TemplateLibrary::new();
        let bad = r#"
name: bad
steps:
  - id: a
    worker: coder
    task: t
    depends_on: [ghost]
"#;
        assert!(library.insert_yaml(bad).is_err());
        assert!(library.is_empty());
    }

    #[test]
    fn test_heuristic_match_by_name() {
        let mut library = TemplateLibrary::new();
        library.insert_yaml(RESEARCH_YAML).unwrap();
        assert!(library
            .match_heuristic("please run research-and-summarize on quantum computing")
            .is_some());
        assert!(library.match_heuristic("write a poem").is_none());
    }

    #[tokio::test]
    async fn test_load_dir_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("good.yaml"), RESEARCH_YAML)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("broken.yaml"), "nope: [")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("ignored.txt"), "not yaml")
            .await
            .unwrap();

        let library = TemplateLibrary::load_dir(dir.path()).await.unwrap();
        assert_eq!(library.len(), 1);
        assert_eq!(library.list()[0].0, "research-and-summarize");
    }

    #[tokio::test]
    async fn test_load_missing_dir_is_empty() {
        let library = TemplateLibrary::load_dir(Path::new("/nonexistent/templates"))
            .await
            .unwrap();
        assert!(library.is_empty());
    }
}
