// tests/common/mod.rs
// Shared harness: the full orchestrator wired to in-memory stores and the
// scripted LLM. No network, no database.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use samvad::cache::CacheLayer;
use samvad::chat::{ChatRequest, ChatService, ClientInfo, EvidencePipeline};
use samvad::config::chat::{ChatConfig, PredictionConfig, RagConfig};
use samvad::config::quota::QuotaConfig;
use samvad::llm::{Embeddings, GenerationParams};
use samvad::quota::QuotaManager;
use samvad::rag::RagRanker;
use samvad::search::{SearchBackend, SearchHit, SearchService};
use samvad::state::RuntimeState;
use samvad::testing::{
    HashEmbeddings, InMemoryConversationStore, InMemoryMemoryStore, InMemoryPredictionStore,
    InMemoryQuotaStore, MockLlmProvider, StaticPageReader, StaticSearchBackend,
};

/// Embeddings wrapper that counts every encoder invocation
pub struct CountingEmbeddings {
    inner: HashEmbeddings,
    calls: AtomicUsize,
}

impl CountingEmbeddings {
    pub fn new() -> Self {
        Self {
            inner: HashEmbeddings,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embeddings for CountingEmbeddings {
    async fn encode(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.encode(text).await
    }

    async fn encode_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.encode_batch(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

pub struct Harness {
    pub chat: Arc<ChatService>,
    pub llm: Arc<MockLlmProvider>,
    pub memory: Arc<InMemoryMemoryStore>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub predictions: Arc<InMemoryPredictionStore>,
    pub quota_store: Arc<InMemoryQuotaStore>,
    pub quota: Arc<QuotaManager>,
    pub search_backend: Arc<StaticSearchBackend>,
    pub cache: Arc<CacheLayer>,
}

pub fn quota_config() -> QuotaConfig {
    QuotaConfig {
        enabled: true,
        guest_message_limit: 3,
        web_search_limit_guest: 5,
        web_search_limit_free: 10,
        web_search_limit_paid: 50,
        plans: QuotaConfig::default_plans(),
    }
}

fn rag_config() -> RagConfig {
    RagConfig {
        memory_limit_paid: 30,
        memory_limit_free: 20,
        knowledge_limit: 3,
        history_limit_paid: 30,
        history_limit_free: 20,
        top_k_paid: 8,
        top_k_free: 5,
        // The deterministic test embeddings are not calibrated like a real
        // encoder; ranking, not the vector floor, does the filtering here
        similarity_threshold: 0.0,
        knowledge_namespace: "public_knowledge".to_string(),
    }
}

fn chat_config() -> ChatConfig {
    ChatConfig {
        history_limit: 10,
        history_seed_limit: 50,
        response_cache_enabled: true,
        retrieval_timeout_secs: 5,
        conversation_cache_capacity: 64,
    }
}

/// Build the orchestrator with optional search results/pages and a custom
/// embeddings client
pub fn build_harness_with(
    search_results: Vec<SearchHit>,
    pages: &[(&str, &str)],
    embeddings: Arc<dyn Embeddings>,
) -> Harness {
    let cache = Arc::new(CacheLayer::in_process());
    let llm = Arc::new(MockLlmProvider::new());
    let memory = Arc::new(InMemoryMemoryStore::new());
    let conversations = Arc::new(InMemoryConversationStore::new());
    let predictions = Arc::new(InMemoryPredictionStore::new());
    let quota_store = Arc::new(InMemoryQuotaStore::new());

    let quota = Arc::new(QuotaManager::new(
        quota_store.clone(),
        cache.clone(),
        quota_config(),
        86_400,
    ));

    let search_backend = Arc::new(StaticSearchBackend::new(search_results));
    let search = Arc::new(SearchService::with_backends(
        Some(search_backend.clone() as Arc<dyn SearchBackend>),
        None,
        cache.clone(),
        3600,
        vec![
            "google.".to_string(),
            "duckduckgo".to_string(),
            "bing.".to_string(),
            "serper".to_string(),
            "search.brave".to_string(),
        ],
    ));
    let scrape = Arc::new(StaticPageReader::new(pages));

    let ranker = Arc::new(RagRanker::new(
        memory.clone(),
        embeddings.clone(),
        rag_config(),
    ));
    let evidence = Arc::new(EvidencePipeline::new(
        search,
        scrape,
        predictions.clone(),
        PredictionConfig {
            sports_ttl_hours: 6,
            general_ttl_hours: 24,
        },
    ));

    let chat = Arc::new(ChatService::new(
        llm.clone(),
        embeddings,
        memory.clone(),
        conversations.clone(),
        quota.clone(),
        ranker,
        evidence,
        cache.clone(),
        Arc::new(RuntimeState::new()),
        chat_config(),
        GenerationParams::default(),
        3600,
    ));

    Harness {
        chat,
        llm,
        memory,
        conversations,
        predictions,
        quota_store,
        quota,
        search_backend,
        cache,
    }
}

pub fn build_harness() -> Harness {
    build_harness_with(Vec::new(), &[], Arc::new(HashEmbeddings))
}

pub fn client() -> ClientInfo {
    ClientInfo::new(None, "203.0.113.7", "harness-agent/1.0")
}

pub fn request(user_id: Option<&str>, conversation_id: Option<&str>, message: &str) -> ChatRequest {
    ChatRequest {
        user_id: user_id.map(|s| s.to_string()),
        conversation_id: conversation_id.map(|s| s.to_string()),
        message: message.to_string(),
        include_web_search: false,
        language: None,
    }
}
