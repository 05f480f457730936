// src/state.rs
// Application state wiring and runtime toggles

use anyhow::Result;
use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::cache::CacheLayer;
use crate::chat::{ChatService, EvidencePipeline};
use crate::config::CONFIG;
use crate::conversation::PgConversationStore;
use crate::llm::{GenerationParams, HttpEmbeddings, OpenAiProvider};
use crate::memory::PgVectorStore;
use crate::predictions::{PgPredictionStore, PredictionStore};
use crate::prompt::{Domain, DEFAULT_PERSONA};
use crate::quota::{PgQuotaStore, QuotaManager};
use crate::rag::RagRanker;
use crate::scrape::ScrapeService;
use crate::search::SearchService;

/// Aggregate usage counters, read for admin views
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    pub total_messages: i64,
    pub total_tokens: i64,
    pub feature_counts: HashMap<String, i64>,
}

struct RuntimeInner {
    modules: HashMap<String, bool>,
    system_prompt_override: Option<String>,
    stats: UsageStats,
}

/// Mutable runtime knobs: feature toggles, the admin-editable system prompt,
/// and usage stats. Toggles are read on each request; all writes go through
/// typed setters.
pub struct RuntimeState {
    inner: RwLock<RuntimeInner>,
}

impl RuntimeState {
    pub fn new() -> Self {
        let modules = ["prediction", "education", "news", "horoscope", "notes"]
            .iter()
            .map(|m| (m.to_string(), true))
            .collect();
        Self {
            inner: RwLock::new(RuntimeInner {
                modules,
                system_prompt_override: None,
                stats: UsageStats::default(),
            }),
        }
    }

    fn domain_module(domain: Domain) -> Option<&'static str> {
        match domain {
            Domain::Prediction => Some("prediction"),
            Domain::Education => Some("education"),
            Domain::News => Some("news"),
            Domain::Horoscope => Some("horoscope"),
            Domain::Notes => Some("notes"),
            Domain::Generic => None,
        }
    }

    pub fn is_module_enabled(&self, module: &str) -> bool {
        self.inner
            .read()
            .modules
            .get(module)
            .copied()
            .unwrap_or(true)
    }

    pub fn set_module(&self, module: &str, enabled: bool) {
        let mut inner = self.inner.write();
        if let Some(flag) = inner.modules.get_mut(module) {
            *flag = enabled;
        }
    }

    /// Prompt line telling the model a feature is switched off, or None when
    /// the turn's domain is enabled
    pub fn disabled_notice(&self, domain: Domain) -> Option<String> {
        let module = Self::domain_module(domain)?;
        if self.is_module_enabled(module) {
            return None;
        }
        Some(format!(
            "NOTE: The {} feature is currently disabled by the administrator. \
             Politely inform the user it is unavailable right now.",
            module
        ))
    }

    pub fn system_prompt(&self) -> String {
        self.inner
            .read()
            .system_prompt_override
            .clone()
            .unwrap_or_else(|| DEFAULT_PERSONA.to_string())
    }

    pub fn set_system_prompt(&self, prompt: Option<String>) {
        self.inner.write().system_prompt_override = prompt;
    }

    pub fn record_turn(&self, domain: Domain, tokens: i64) {
        let mut inner = self.inner.write();
        inner.stats.total_messages += 1;
        inner.stats.total_tokens += tokens;
        if let Some(module) = Self::domain_module(domain) {
            *inner
                .stats
                .feature_counts
                .entry(module.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn stats(&self) -> UsageStats {
        self.inner.read().stats.clone()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub runtime: Arc<RuntimeState>,
    pub cache: Arc<CacheLayer>,
    pub predictions: Arc<dyn PredictionStore>,
    pub pool: PgPool,
}

impl AppState {
    pub async fn new(pool: PgPool) -> Result<Self> {
        CONFIG.validate()?;

        info!("Connecting cache layer");
        let cache = Arc::new(CacheLayer::connect(&CONFIG.cache.redis_url).await);

        info!("Initializing LLM provider ({})", CONFIG.llm.model);
        let llm = Arc::new(OpenAiProvider::new(
            CONFIG.llm.api_key.clone(),
            CONFIG.llm.base_url.clone(),
            CONFIG.llm.model.clone(),
            CONFIG.llm.timeout_secs,
        )?);

        info!(
            "Initializing embedding client ({}, {}d)",
            CONFIG.embedding.model, CONFIG.embedding.dimension
        );
        let embeddings = Arc::new(HttpEmbeddings::new(
            CONFIG.embedding.api_key.clone(),
            CONFIG.embedding.base_url.clone(),
            CONFIG.embedding.model.clone(),
            CONFIG.embedding.dimension,
            CONFIG.embedding.timeout_secs,
        )?);

        info!("Initializing vector memory store");
        let memory = Arc::new(PgVectorStore::new(pool.clone(), CONFIG.embedding.dimension).await);

        info!("Initializing conversation store");
        let conversations = Arc::new(PgConversationStore::new(pool.clone()));
        conversations.ensure_schema().await?;

        info!("Initializing prediction cache");
        let predictions = Arc::new(PgPredictionStore::new(pool.clone()));
        predictions.ensure_schema().await?;

        info!("Initializing quota manager");
        let quota_store = Arc::new(PgQuotaStore::new(pool.clone()));
        quota_store.ensure_schema().await?;
        let quota = Arc::new(QuotaManager::new(
            quota_store,
            cache.clone(),
            CONFIG.quota.clone(),
            CONFIG.cache.web_search_counter_ttl_secs,
        ));

        let search = Arc::new(SearchService::new(&CONFIG.search, cache.clone()));
        let scrape = Arc::new(ScrapeService::new(CONFIG.scrape.clone(), cache.clone())?);

        let ranker = Arc::new(RagRanker::new(
            memory.clone(),
            embeddings.clone(),
            CONFIG.rag.clone(),
        ));
        let evidence = Arc::new(EvidencePipeline::new(
            search,
            scrape,
            predictions.clone(),
            CONFIG.prediction.clone(),
        ));

        let predictions: Arc<dyn PredictionStore> = predictions;
        let runtime = Arc::new(RuntimeState::new());

        let chat = Arc::new(ChatService::new(
            llm,
            embeddings,
            memory,
            conversations,
            quota,
            ranker,
            evidence,
            cache.clone(),
            runtime.clone(),
            CONFIG.chat.clone(),
            GenerationParams {
                temperature: CONFIG.llm.temperature,
                max_tokens: CONFIG.llm.max_tokens,
            },
            CONFIG.cache.response_ttl_secs,
        ));

        info!("Application state initialized");

        Ok(Self {
            chat,
            runtime,
            cache,
            predictions,
            pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_toggles() {
        let runtime = RuntimeState::new();
        assert!(runtime.is_module_enabled("news"));
        assert!(runtime.disabled_notice(Domain::News).is_none());

        runtime.set_module("news", false);
        assert!(!runtime.is_module_enabled("news"));
        let notice = runtime.disabled_notice(Domain::News).unwrap();
        assert!(notice.contains("disabled"));

        // Generic turns have no module to disable
        assert!(runtime.disabled_notice(Domain::Generic).is_none());
    }

    #[test]
    fn test_usage_stats_accumulate() {
        let runtime = RuntimeState::new();
        runtime.record_turn(Domain::News, 120);
        runtime.record_turn(Domain::News, 80);
        runtime.record_turn(Domain::Generic, 10);

        let stats = runtime.stats();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.total_tokens, 210);
        assert_eq!(stats.feature_counts.get("news"), Some(&2));
        assert_eq!(stats.feature_counts.get("prediction"), None);
    }

    #[test]
    fn test_system_prompt_override() {
        let runtime = RuntimeState::new();
        assert!(runtime.system_prompt().contains("Samvad"));

        runtime.set_system_prompt(Some("custom persona".to_string()));
        assert_eq!(runtime.system_prompt(), "custom persona");

        runtime.set_system_prompt(None);
        assert!(runtime.system_prompt().contains("Samvad"));
    }
}
