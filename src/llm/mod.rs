// src/llm/mod.rs
// LLM provider interface and shared message types

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod embeddings;
pub mod openai;

pub use embeddings::{Embeddings, HttpEmbeddings};
pub use openai::OpenAiProvider;

/// Simple message format used everywhere: conversation history, the LLM wire
/// format, and persisted turns. Role vocabulary is `user` / `assistant`;
/// system content travels as a separate parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}

/// Sampling parameters for a generation call
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// Token estimate for providers that don't report usage: ceil(chars / 4).
/// Coarse, but token accounting only feeds response metadata and usage
/// stats, never admission decisions.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() as i64 + 3) / 4
}

/// Completed generation with token accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Universal LLM provider interface
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Generate a completion for the conversation
    async fn generate(
        &self,
        messages: Vec<Message>,
        system_prompt: &str,
        params: GenerationParams,
    ) -> Result<LlmResponse>;

    /// Optional streaming variant yielding text chunks
    async fn stream(
        &self,
        _messages: Vec<Message>,
        _system_prompt: &str,
        _params: GenerationParams,
    ) -> Result<Box<dyn futures::Stream<Item = Result<String>> + Send + Unpin>> {
        Err(anyhow::anyhow!("{} does not support streaming", self.name()))
    }
}
