// src/config/mod.rs
// Central configuration for the samvad orchestrator

pub mod chat;
pub mod helpers;
pub mod llm;
pub mod quota;
pub mod search;
pub mod server;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

pub use quota::Plan;

lazy_static! {
    pub static ref CONFIG: SamvadConfig = SamvadConfig::from_env();
}

/// Main configuration structure - composes all domain configs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamvadConfig {
    pub llm: llm::LlmConfig,
    pub embedding: llm::EmbeddingConfig,
    pub search: search::SearchConfig,
    pub scrape: search::ScrapeConfig,
    pub quota: quota::QuotaConfig,
    pub chat: chat::ChatConfig,
    pub rag: chat::RagConfig,
    pub prediction: chat::PredictionConfig,
    pub database: server::DatabaseConfig,
    pub cache: server::CacheConfig,
    pub logging: server::LoggingConfig,
}

impl SamvadConfig {
    pub fn from_env() -> Self {
        // Don't panic if .env doesn't exist (production reads real env)
        dotenv::dotenv().ok();

        Self {
            llm: llm::LlmConfig::from_env(),
            embedding: llm::EmbeddingConfig::from_env(),
            search: search::SearchConfig::from_env(),
            scrape: search::ScrapeConfig::from_env(),
            quota: quota::QuotaConfig::from_env(),
            chat: chat::ChatConfig::from_env(),
            rag: chat::RagConfig::from_env(),
            prediction: chat::PredictionConfig::from_env(),
            database: server::DatabaseConfig::from_env(),
            cache: server::CacheConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
        }
    }

    /// Validate config on startup
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.validate()?;
        if self.embedding.dimension == 0 {
            return Err(anyhow::anyhow!("EMBEDDING_DIMENSION must be non-zero"));
        }
        Ok(())
    }
}

impl Default for SamvadConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
