//! Session index.
//!
//! Tracks the sessions the service has seen. Records are created on first
//! use and destroyed only on explicit removal, which also drops the
//! session's checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One known session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub name: Option<String>,
}

/// In-memory session registry.
#[derive(Default)]
pub struct SessionIndex {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the record for a session id.
    pub async fn ensure(&self, id: &str, user_id: Option<&str>) -> SessionRecord {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionRecord {
                id: id.to_string(),
                user_id: user_id.map(String::from),
                created_at: Utc::now(),
                name: None,
            })
            .clone()
    }

    /// Fetch a record.
    pub async fn get(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Rename a session.
    pub async fn rename(&self, id: &str, name: impl Into<String>) -> Option<SessionRecord> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(id)?;
        record.name = Some(name.into());
        Some(record.clone())
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> =
            self.sessions.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Remove a record; returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_is_create_on_first_use() {
        let index = SessionIndex::new();
        let first = index.ensure("s1", Some("u1")).await;
        let second = index.ensure("s1", Some("u2")).await;
        // The original owner sticks.
        assert_eq!(second.user_id.as_deref(), Some("u1"));
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_remove() {
        let index = SessionIndex::new();
        index.ensure("s1", None).await;
        assert!(index.remove("s1").await);
        assert!(!index.remove("s1").await);
        assert!(index.get("s1").await.is_none());
    }
}
