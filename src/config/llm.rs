// src/config/llm.rs
// LLM and embedding provider configuration

use serde::{Deserialize, Serialize};

/// Chat model configuration (OpenAI-compatible endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: super::helpers::env_or("LLM_API_KEY", ""),
            base_url: super::helpers::env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            model: super::helpers::env_or("LLM_MODEL", "gpt-4o-mini"),
            temperature: super::helpers::env_parsed("LLM_TEMPERATURE", 0.7),
            max_tokens: super::helpers::env_parsed("LLM_MAX_TOKENS", 2000),
            timeout_secs: super::helpers::env_parsed("LLM_TIMEOUT", 60),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(anyhow::anyhow!(
                "LLM_TEMPERATURE must be between 0.0 and 2.0"
            ));
        }
        Ok(())
    }
}

/// Embedding model configuration
///
/// The dimension is a global constant for the deployment: every stored vector
/// and every query vector must use the same encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: super::helpers::env_or("EMBEDDING_API_KEY", ""),
            base_url: super::helpers::env_or("EMBEDDING_BASE_URL", "https://api.openai.com/v1"),
            model: super::helpers::env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            dimension: super::helpers::env_parsed("EMBEDDING_DIMENSION", 768),
            timeout_secs: super::helpers::env_parsed("EMBEDDING_TIMEOUT", 30),
        }
    }
}
