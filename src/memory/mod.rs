// src/memory/mod.rs

//! Per-user long-term memory: append-only vector records plus the profile row.
//!
//! The store trait is a capability interface; the orchestrator holds it by
//! `Arc<dyn MemoryStore>` and never sees the backend. Production runs on
//! Postgres + pgvector, tests run on the in-memory store in `crate::testing`.

pub mod pgvector;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use pgvector::PgVectorStore;

/// True for principal ids that must never own persisted memory
pub fn is_guest_id(user_id: &str) -> bool {
    user_id.starts_with("guest_") || user_id.starts_with("guest-") || user_id == "anonymous-user"
}

/// Memory record categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Conversation,
    Document,
    Knowledge,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Conversation => "conversation",
            MemoryKind::Document => "document",
            MemoryKind::Knowledge => "knowledge",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conversation" => Ok(MemoryKind::Conversation),
            "document" => Ok(MemoryKind::Document),
            "knowledge" => Ok(MemoryKind::Knowledge),
            _ => Err(anyhow::anyhow!("Unknown memory kind: {}", s)),
        }
    }
}

/// A memory to append
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
    pub kind: MemoryKind,
}

/// A retrieved memory with its similarity to the query
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub id: i64,
    pub content: String,
    pub metadata: Value,
    pub kind: MemoryKind,
    pub similarity: f64,
    pub created_at: DateTime<Utc>,
}

/// Durable per-user profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub preferences: serde_json::Map<String, Value>,
    pub interests: Vec<String>,
    pub conversation_count: i64,
    pub total_messages: i64,
    pub first_seen: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl UserProfile {
    pub fn empty(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            preferences: serde_json::Map::new(),
            interests: Vec::new(),
            conversation_count: 0,
            total_messages: 0,
            first_seen: now,
            last_active: now,
        }
    }

    pub fn preference_str(&self, key: &str) -> Option<&str> {
        self.preferences.get(key).and_then(|v| v.as_str())
    }

    pub fn preference_list(&self, key: &str) -> Vec<String> {
        self.preferences
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merge a learned delta into the profile.
    ///
    /// Scalar preferences overwrite by key; list-valued preferences
    /// union-merge without duplicates; interests union-merge. Nothing ever
    /// shrinks automatically, so applying the same delta twice is a no-op.
    pub fn apply_delta(&mut self, delta: &ProfileDelta) {
        for (key, value) in &delta.preferences {
            match (self.preferences.get_mut(key), value.as_array()) {
                (Some(Value::Array(list)), Some(additions)) => {
                    for item in additions {
                        if !list.contains(item) {
                            list.push(item.clone());
                        }
                    }
                }
                _ => {
                    self.preferences.insert(key.clone(), value.clone());
                }
            }
        }

        for interest in &delta.interests {
            if !self.interests.contains(interest) {
                self.interests.push(interest.clone());
            }
        }

        if delta.increment_messages {
            self.total_messages += 1;
        }
        self.last_active = Utc::now();
    }
}

/// What the profile learner extracted from one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileDelta {
    pub preferences: serde_json::Map<String, Value>,
    pub interests: Vec<String>,
    pub increment_messages: bool,
}

impl ProfileDelta {
    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty() && self.interests.is_empty()
    }
}

/// Long-term memory capability
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append a memory. Returns false when the store is degraded or the
    /// record was rejected (guest principal, dimension mismatch).
    async fn add_memory(&self, memory: NewMemory) -> Result<bool>;

    /// Cosine top-k for one user's namespace, `1 - distance >= threshold`,
    /// sorted descending by similarity (ties by id).
    async fn search_similar(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
        threshold: f64,
        kind: Option<MemoryKind>,
    ) -> Result<Vec<MemoryHit>>;

    /// Chronological records of one conversation (oldest first)
    async fn conversation_history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>>;

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    async fn update_user_profile(&self, user_id: &str, delta: &ProfileDelta) -> Result<()>;

    /// Right-to-delete: removes the user's memories and profile
    async fn delete_user_data(&self, user_id: &str) -> Result<u64>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_guest_id_detection() {
        assert!(is_guest_id("guest_abc123"));
        assert!(is_guest_id("guest-abc123"));
        assert!(is_guest_id("anonymous-user"));
        assert!(!is_guest_id("5f3a-registered-user"));
    }

    #[test]
    fn test_profile_merge_overwrites_scalars() {
        let mut profile = UserProfile::empty("u1");
        let mut delta = ProfileDelta::default();
        delta.preferences.insert("name".into(), json!("Ravi"));
        profile.apply_delta(&delta);
        assert_eq!(profile.preference_str("name"), Some("Ravi"));

        let mut delta2 = ProfileDelta::default();
        delta2.preferences.insert("name".into(), json!("Ravindra"));
        profile.apply_delta(&delta2);
        assert_eq!(profile.preference_str("name"), Some("Ravindra"));
    }

    #[test]
    fn test_profile_merge_is_idempotent() {
        let mut delta = ProfileDelta::default();
        delta.preferences.insert("name".into(), json!("Ravi"));
        delta.preferences.insert("likes".into(), json!(["cricket"]));
        delta.interests.push("sports".into());

        let mut once = UserProfile::empty("u1");
        once.apply_delta(&delta);

        let mut twice = UserProfile::empty("u1");
        twice.apply_delta(&delta);
        twice.apply_delta(&delta);

        assert_eq!(once.preferences, twice.preferences);
        assert_eq!(once.interests, twice.interests);
    }

    #[test]
    fn test_profile_merge_unions_lists() {
        let mut profile = UserProfile::empty("u1");

        let mut delta = ProfileDelta::default();
        delta.preferences.insert("likes".into(), json!(["cricket"]));
        profile.apply_delta(&delta);

        let mut delta2 = ProfileDelta::default();
        delta2
            .preferences
            .insert("likes".into(), json!(["cricket", "movies"]));
        profile.apply_delta(&delta2);

        assert_eq!(profile.preference_list("likes"), vec!["cricket", "movies"]);
    }

    #[test]
    fn test_interests_never_shrink() {
        let mut profile = UserProfile::empty("u1");
        let mut delta = ProfileDelta::default();
        delta.interests = vec!["sports".into(), "technology".into()];
        profile.apply_delta(&delta);

        // An empty delta leaves interests intact
        profile.apply_delta(&ProfileDelta::default());
        assert_eq!(profile.interests.len(), 2);
    }
}
