// src/testing/mod.rs

//! Test doubles: a scripted LLM provider, deterministic embeddings, and
//! in-memory implementations of every store trait. Integration tests drive
//! the full orchestrator against these, so no external service or database
//! is needed.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::llm::embeddings::cosine_similarity;
use crate::llm::{estimate_tokens, Embeddings, GenerationParams, LlmProvider, LlmResponse, Message};
use crate::memory::{
    is_guest_id, MemoryHit, MemoryKind, MemoryStore, NewMemory, ProfileDelta, UserProfile,
};
use crate::predictions::{PredictionBundle, PredictionKey, PredictionStore};
use crate::quota::{GuestAdmit, QuotaLedger, QuotaStore};
use crate::scrape::{PageReader, PageSnapshot};
use crate::search::{SearchBackend, SearchHit};
use crate::conversation::{
    truncate_bytes, ConversationStore, ConversationSummary, StoredMessage, MAX_MESSAGE_BYTES,
};

// ---------------------------------------------------------------------------
// LLM

/// Scripted LLM provider: replays canned responses by substring match on the
/// last user message, and counts calls.
pub struct MockLlmProvider {
    scripts: Mutex<Vec<(String, String)>>,
    calls: AtomicUsize,
    fail: Mutex<bool>,
    last_system: Mutex<String>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail: Mutex::new(false),
            last_system: Mutex::new(String::new()),
        }
    }

    /// System prompt of the most recent generate call
    pub fn last_system_prompt(&self) -> String {
        self.last_system.lock().clone()
    }

    /// Respond with `response` whenever the last user message contains
    /// `prompt_contains`
    pub fn add_response(&self, prompt_contains: &str, response: &str) {
        self.scripts
            .lock()
            .push((prompt_contains.to_string(), response.to_string()));
    }

    /// Make every generate call fail (for hard-failure paths)
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(
        &self,
        messages: Vec<Message>,
        system_prompt: &str,
        _params: GenerationParams,
    ) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system.lock() = system_prompt.to_string();

        if *self.fail.lock() {
            return Err(anyhow::anyhow!("simulated LLM outage"));
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let scripted = self
            .scripts
            .lock()
            .iter()
            .find(|(pattern, _)| last_user.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());

        let text = scripted.unwrap_or_else(|| format!("You said: {}", last_user));
        Ok(LlmResponse {
            prompt_tokens: 50,
            completion_tokens: estimate_tokens(&text),
            text,
        })
    }
}

// ---------------------------------------------------------------------------
// Embeddings

/// Deterministic embeddings: identical text always encodes to the identical
/// unit vector, distinct texts land far apart. Dimension 8.
pub struct HashEmbeddings;

impl HashEmbeddings {
    pub const DIMENSION: usize = 8;

    pub fn vector_for(text: &str) -> Vec<f32> {
        // 32 digest bytes fold into 8 positive components, so the norm is
        // never zero and equal (normalized) text always maps to the same
        // unit vector
        let digest = Sha256::digest(text.trim().to_lowercase().as_bytes());
        let mut vector: Vec<f32> = digest
            .chunks(4)
            .take(Self::DIMENSION)
            .map(|chunk| {
                let folded = chunk.iter().fold(0u32, |acc, b| acc * 31 + *b as u32);
                (folded % 997) as f32 + 1.0
            })
            .collect();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        for v in &mut vector {
            *v /= norm;
        }
        vector
    }
}

#[async_trait]
impl Embeddings for HashEmbeddings {
    async fn encode(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::vector_for(text)))
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.encode(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        Self::DIMENSION
    }
}

// ---------------------------------------------------------------------------
// Memory store

struct StoredMemory {
    id: i64,
    user_id: String,
    conversation_id: Option<String>,
    content: String,
    embedding: Vec<f32>,
    metadata: serde_json::Value,
    kind: MemoryKind,
    created_at: chrono::DateTime<Utc>,
}

/// In-memory vector store with real cosine ranking
pub struct InMemoryMemoryStore {
    records: Mutex<Vec<StoredMemory>>,
    profiles: Mutex<HashMap<String, UserProfile>>,
    next_id: AtomicI64,
    degraded: Mutex<bool>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            degraded: Mutex::new(false),
        }
    }

    /// Simulate an unreachable vector index
    pub fn set_degraded(&self, degraded: bool) {
        *self.degraded.lock() = degraded;
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn records_for(&self, user_id: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.user_id == user_id)
            .count()
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn add_memory(&self, memory: NewMemory) -> Result<bool> {
        if is_guest_id(&memory.user_id) {
            return Ok(false);
        }
        if *self.degraded.lock() {
            return Ok(false);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.lock().push(StoredMemory {
            id,
            user_id: memory.user_id,
            conversation_id: memory.conversation_id,
            content: memory.content,
            embedding: memory.embedding,
            metadata: memory.metadata,
            kind: memory.kind,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn search_similar(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
        threshold: f64,
        kind: Option<MemoryKind>,
    ) -> Result<Vec<MemoryHit>> {
        if *self.degraded.lock() {
            return Ok(Vec::new());
        }

        let records = self.records.lock();
        let mut hits: Vec<MemoryHit> = records
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| kind.map(|k| r.kind == k).unwrap_or(true))
            .map(|r| MemoryHit {
                id: r.id,
                content: r.content.clone(),
                metadata: r.metadata.clone(),
                kind: r.kind,
                similarity: cosine_similarity(&r.embedding, query) as f64,
                created_at: r.created_at,
            })
            .filter(|h| h.similarity >= threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn conversation_history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>> {
        if *self.degraded.lock() {
            return Ok(Vec::new());
        }

        let records = self.records.lock();
        let mut hits: Vec<MemoryHit> = records
            .iter()
            .filter(|r| {
                r.user_id == user_id
                    && r.conversation_id.as_deref() == Some(conversation_id)
                    && r.kind == MemoryKind::Conversation
            })
            .map(|r| MemoryHit {
                id: r.id,
                content: r.content.clone(),
                metadata: r.metadata.clone(),
                kind: r.kind,
                similarity: 0.0,
                created_at: r.created_at,
            })
            .collect();
        hits.sort_by_key(|h| h.id);
        if hits.len() > limit {
            let skip = hits.len() - limit;
            hits.drain(..skip);
        }
        Ok(hits)
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        if *self.degraded.lock() {
            return Ok(None);
        }
        Ok(self.profiles.lock().get(user_id).cloned())
    }

    async fn update_user_profile(&self, user_id: &str, delta: &ProfileDelta) -> Result<()> {
        if is_guest_id(user_id) || *self.degraded.lock() {
            return Ok(());
        }
        let mut profiles = self.profiles.lock();
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::empty(user_id));
        profile.apply_delta(delta);
        Ok(())
    }

    async fn delete_user_data(&self, user_id: &str) -> Result<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.user_id != user_id);
        self.profiles.lock().remove(user_id);
        Ok((before - records.len()) as u64)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.conversation_id.as_deref() != Some(conversation_id));
        Ok((before - records.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Conversation store

/// In-memory conversation log with the same truncation rules as Postgres
pub struct InMemoryConversationStore {
    messages: Mutex<Vec<(String, String, StoredMessage)>>, // (user_id, conversation_id, message)
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Role sequence of one conversation, for alternation assertions
    pub fn roles(&self, conversation_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(_, cid, _)| cid == conversation_id)
            .map(|(_, _, m)| m.role.clone())
            .collect()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        self.messages.lock().push((
            user_id.to_string(),
            conversation_id.to_string(),
            StoredMessage {
                role: role.to_string(),
                content: truncate_bytes(content, MAX_MESSAGE_BYTES).to_string(),
                created_at: Utc::now(),
            },
        ));
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationSummary>> {
        let messages = self.messages.lock();
        let mut by_conversation: HashMap<String, Vec<&StoredMessage>> = HashMap::new();
        for (uid, cid, message) in messages.iter() {
            if uid == user_id {
                by_conversation.entry(cid.clone()).or_default().push(message);
            }
        }

        let mut summaries: Vec<ConversationSummary> = by_conversation
            .into_iter()
            .map(|(id, msgs)| ConversationSummary {
                id,
                created_at: msgs.first().map(|m| m.created_at),
                updated_at: msgs.last().map(|m| m.created_at),
                message_count: msgs.len() as i64,
                preview: msgs
                    .iter()
                    .find(|m| m.role == "user")
                    .map(|m| m.content.chars().take(120).collect())
                    .unwrap_or_else(|| "Conversation".to_string()),
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn get(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|(_, cid, _)| cid == conversation_id)
            .map(|(_, _, m)| m.clone())
            .collect())
    }

    async fn delete(&self, conversation_id: &str) -> Result<u64> {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|(_, cid, _)| cid != conversation_id);
        Ok((before - messages.len()) as u64)
    }

    async fn delete_all(&self, user_id: &str) -> Result<u64> {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|(uid, _, _)| uid != user_id);
        Ok((before - messages.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Prediction store

/// In-memory prediction cache with the same key/expiry semantics as Postgres
pub struct InMemoryPredictionStore {
    bundles: Mutex<Vec<PredictionBundle>>,
    next_id: AtomicI64,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self {
            bundles: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.lock().len()
    }

    pub fn view_count(&self, id: i64) -> Option<i64> {
        self.bundles
            .lock()
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.view_count)
    }

    /// Force a bundle's expiry into the past (for TTL tests)
    pub fn expire(&self, id: i64) {
        if let Some(bundle) = self.bundles.lock().iter_mut().find(|b| b.id == id) {
            bundle.expires_at = Utc::now() - Duration::hours(1);
        }
    }
}

impl Default for InMemoryPredictionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PredictionStore for InMemoryPredictionStore {
    async fn get(&self, key: &PredictionKey) -> Result<Option<PredictionBundle>> {
        let now = Utc::now();
        let mut bundles = self.bundles.lock();
        let hit = bundles
            .iter_mut()
            .filter(|b| {
                b.active
                    && b.expires_at > now
                    && b.sport == key.sport
                    && b.query_type == key.query_type
                    && b.match_details == key.match_details
            })
            .max_by_key(|b| (b.created_at, b.id));

        match hit {
            Some(bundle) => {
                bundle.view_count += 1;
                Ok(Some(bundle.clone()))
            }
            None => Ok(None),
        }
    }

    async fn peek(&self, key: &PredictionKey) -> Result<bool> {
        let now = Utc::now();
        Ok(self.bundles.lock().iter().any(|b| {
            b.active
                && b.expires_at > now
                && b.sport == key.sport
                && b.query_type == key.query_type
                && b.match_details == key.match_details
        }))
    }

    async fn put(
        &self,
        key: &PredictionKey,
        analysis: &str,
        sources: &[crate::search::SourceRef],
        ttl_hours: i64,
    ) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        self.bundles.lock().push(PredictionBundle {
            id,
            sport: key.sport.clone(),
            query_type: key.query_type.clone(),
            match_details: key.match_details.clone(),
            analysis: analysis.to_string(),
            sources: sources.to_vec(),
            created_at: now,
            expires_at: now + Duration::hours(ttl_hours),
            view_count: 0,
            active: true,
        });
        Ok(id)
    }

    async fn popular(&self, sport: Option<&str>, limit: usize) -> Result<Vec<PredictionBundle>> {
        let now = Utc::now();
        let mut live: Vec<PredictionBundle> = self
            .bundles
            .lock()
            .iter()
            .filter(|b| b.active && b.expires_at > now)
            .filter(|b| sport.map(|s| b.sport == s).unwrap_or(true))
            .cloned()
            .collect();
        live.sort_by(|a, b| b.view_count.cmp(&a.view_count).then(b.id.cmp(&a.id)));
        live.truncate(limit);
        Ok(live)
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut retired = 0;
        for bundle in self.bundles.lock().iter_mut() {
            if bundle.active && bundle.expires_at < now {
                bundle.active = false;
                retired += 1;
            }
        }
        Ok(retired)
    }
}

// ---------------------------------------------------------------------------
// Quota store

#[derive(Default)]
struct GuestRow {
    count: i64,
}

/// In-memory quota store with check-then-increment semantics
pub struct InMemoryQuotaStore {
    guests: Mutex<HashMap<String, GuestRow>>,
    ledgers: Mutex<HashMap<String, QuotaLedger>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self {
            guests: Mutex::new(HashMap::new()),
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a ledger (e.g. a paid tier, or counters near a limit)
    pub fn put_ledger(&self, ledger: QuotaLedger) {
        self.ledgers
            .lock()
            .insert(ledger.user_id.clone(), ledger);
    }

    pub fn ledger(&self, user_id: &str) -> Option<QuotaLedger> {
        self.ledgers.lock().get(user_id).cloned()
    }
}

impl Default for InMemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn try_admit_guest(&self, fingerprint: &str, _ip: &str, limit: i64) -> Result<GuestAdmit> {
        let mut guests = self.guests.lock();
        let row = guests.entry(fingerprint.to_string()).or_default();
        if row.count >= limit {
            return Ok(GuestAdmit {
                admitted: false,
                count: row.count,
            });
        }
        row.count += 1;
        Ok(GuestAdmit {
            admitted: true,
            count: row.count,
        })
    }

    async fn guest_count(&self, fingerprint: &str) -> Result<i64> {
        Ok(self
            .guests
            .lock()
            .get(fingerprint)
            .map(|r| r.count)
            .unwrap_or(0))
    }

    async fn load_ledger(&self, user_id: &str) -> Result<Option<QuotaLedger>> {
        Ok(self.ledgers.lock().get(user_id).cloned())
    }

    async fn create_ledger(&self, user_id: &str, tier: &str) -> Result<QuotaLedger> {
        let ledger = QuotaLedger {
            user_id: user_id.to_string(),
            tier: tier.to_string(),
            messages_lifetime: 0,
            messages_today: 0,
            daily_reset_at: Utc::now() + Duration::hours(24),
        };
        self.ledgers
            .lock()
            .entry(user_id.to_string())
            .or_insert_with(|| ledger.clone());
        Ok(self.ledgers.lock().get(user_id).cloned().unwrap_or(ledger))
    }

    async fn reset_daily(&self, user_id: &str, reset_at: chrono::DateTime<Utc>) -> Result<()> {
        if let Some(ledger) = self.ledgers.lock().get_mut(user_id) {
            ledger.messages_today = 0;
            ledger.daily_reset_at = reset_at;
        }
        Ok(())
    }

    async fn increment_messages(&self, user_id: &str) -> Result<(i64, i64)> {
        let mut ledgers = self.ledgers.lock();
        let ledger = ledgers
            .get_mut(user_id)
            .ok_or_else(|| anyhow::anyhow!("no ledger for {}", user_id))?;
        ledger.messages_lifetime += 1;
        ledger.messages_today += 1;
        Ok((ledger.messages_lifetime, ledger.messages_today))
    }

    async fn set_tier(&self, user_id: &str, tier: &str) -> Result<()> {
        let mut ledgers = self.ledgers.lock();
        match ledgers.get_mut(user_id) {
            Some(ledger) => ledger.tier = tier.to_string(),
            None => {
                ledgers.insert(
                    user_id.to_string(),
                    QuotaLedger {
                        user_id: user_id.to_string(),
                        tier: tier.to_string(),
                        messages_lifetime: 0,
                        messages_today: 0,
                        daily_reset_at: Utc::now() + Duration::hours(24),
                    },
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Search + scrape

/// Search backend returning a fixed result list and counting provider calls
pub struct StaticSearchBackend {
    results: Vec<SearchHit>,
    calls: AtomicUsize,
}

impl StaticSearchBackend {
    pub fn new(results: Vec<SearchHit>) -> Self {
        Self {
            results,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for StaticSearchBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}

/// Page reader serving canned snapshots (no network)
pub struct StaticPageReader {
    pages: HashMap<String, String>,
}

impl StaticPageReader {
    pub fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, text)| (url.to_string(), text.to_string()))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            pages: HashMap::new(),
        }
    }
}

#[async_trait]
impl PageReader for StaticPageReader {
    async fn fetch_and_parse(&self, url: &str, _ttl_secs: i64) -> Option<PageSnapshot> {
        self.pages.get(url).map(|text| PageSnapshot {
            url: url.to_string(),
            title: format!("Page at {}", url),
            text: text.clone(),
            fetched_at: Utc::now().to_rfc3339(),
        })
    }
}

/// Convenience: a search hit pointing at a scrapeable URL
pub fn search_hit(title: &str, url: &str, snippet: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        snippet: snippet.to_string(),
        source: crate::search::host_of(url),
    }
}

pub type SharedSearchBackend = Arc<StaticSearchBackend>;
