// src/config/chat.rs
// Orchestrator, retrieval, and prediction-cache tunables

use serde::{Deserialize, Serialize};

/// Per-turn orchestration knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Messages of history handed to the LLM
    pub history_limit: usize,
    /// Memories loaded when seeding a fresh conversation for a returning user
    pub history_seed_limit: usize,
    pub response_cache_enabled: bool,
    /// Per-stage deadline for the retrieval fan-out
    pub retrieval_timeout_secs: u64,
    /// Hot in-process conversation cache bound
    pub conversation_cache_capacity: usize,
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self {
            history_limit: super::helpers::env_parsed("CONVERSATION_HISTORY_LIMIT", 10),
            history_seed_limit: super::helpers::env_parsed("CONVERSATION_SEED_LIMIT", 50),
            response_cache_enabled: super::helpers::env_bool("RESPONSE_CACHE_ENABLED", true),
            retrieval_timeout_secs: super::helpers::env_parsed("RETRIEVAL_TIMEOUT", 20),
            conversation_cache_capacity: super::helpers::env_parsed("CONVERSATION_CACHE_CAPACITY", 512),
        }
    }
}

/// Retrieval depth and ranking thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub memory_limit_paid: usize,
    pub memory_limit_free: usize,
    pub knowledge_limit: usize,
    pub history_limit_paid: usize,
    pub history_limit_free: usize,
    pub top_k_paid: usize,
    pub top_k_free: usize,
    /// Minimum cosine similarity for vector store hits
    pub similarity_threshold: f64,
    /// Namespace holding shared public knowledge
    pub knowledge_namespace: String,
}

impl RagConfig {
    pub fn from_env() -> Self {
        Self {
            memory_limit_paid: super::helpers::env_parsed("RAG_MEMORY_LIMIT_PAID", 30),
            memory_limit_free: super::helpers::env_parsed("RAG_MEMORY_LIMIT_FREE", 20),
            knowledge_limit: super::helpers::env_parsed("RAG_KNOWLEDGE_LIMIT", 3),
            history_limit_paid: super::helpers::env_parsed("RAG_HISTORY_LIMIT_PAID", 30),
            history_limit_free: super::helpers::env_parsed("RAG_HISTORY_LIMIT_FREE", 20),
            top_k_paid: super::helpers::env_parsed("RAG_TOP_K_PAID", 8),
            top_k_free: super::helpers::env_parsed("RAG_TOP_K_FREE", 5),
            similarity_threshold: super::helpers::env_parsed("RAG_SIMILARITY_THRESHOLD", 0.7),
            knowledge_namespace: super::helpers::env_or("RAG_KNOWLEDGE_NAMESPACE", "public_knowledge"),
        }
    }
}

/// Freshness windows for the shared prediction cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    pub sports_ttl_hours: i64,
    pub general_ttl_hours: i64,
}

impl PredictionConfig {
    pub fn from_env() -> Self {
        Self {
            sports_ttl_hours: super::helpers::env_parsed("PREDICTION_TTL_SPORTS_HOURS", 6),
            general_ttl_hours: super::helpers::env_parsed("PREDICTION_TTL_GENERAL_HOURS", 24),
        }
    }
}
