// src/chat/mod.rs

//! The per-turn orchestrator.
//!
//! One admitted message fans out to memory retrieval and the web-evidence
//! pipeline in parallel, composes a layered prompt, makes a single LLM call,
//! persists the turn, and learns the user's preferences. Any sub-stage may
//! fail or time out; the turn still produces a best-effort answer. Only
//! quota denial and LLM failure surface as errors.

pub mod evidence;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheLayer;
use crate::config::chat::ChatConfig;
use crate::conversation::{ConversationCache, ConversationStore, ConversationSummary};
use crate::error::{ChatError, ChatResult};
use crate::language::{detect_language, Language};
use crate::llm::{Embeddings, GenerationParams, LlmProvider, Message};
use crate::memory::{MemoryKind, MemoryStore, NewMemory, UserProfile};
use crate::profile;
use crate::prompt::{self, Domain, PromptInputs};
use crate::quota::{Admission, Principal, QuotaManager};
use crate::rag::{gate, RagRanker};
use crate::search::SourceRef;
use crate::sports;
use crate::state::RuntimeState;

pub use evidence::{EvidencePipeline, WebEvidence};

const RESPONSE_CACHE_PREFIX: &str = "resp";
const HISTORY_SEED_QUERY: &str = "recent conversation history";
const USER_MEMORY_PREFIX: &str = "User said: ";
const ASSISTANT_MEMORY_PREFIX: &str = "Samvad replied: ";
const ASSISTANT_MEMORY_CHARS: usize = 800;

/// Request metadata used only for fingerprinting guests
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    /// `forwarded_for` is the X-Forwarded-For header; its first value wins
    pub fn new(forwarded_for: Option<&str>, remote_ip: &str, user_agent: &str) -> Self {
        let ip = forwarded_for
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| remote_ip.to_string());
        Self {
            ip,
            user_agent: user_agent.to_string(),
        }
    }
}

/// Ingress message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub include_web_search: bool,
    pub language: Option<String>,
}

/// Emitted response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub user_id: String,
    pub conversation_id: String,
    pub message: String,
    pub response: String,
    pub language: String,
    pub tokens_used: i64,
    pub sources: Vec<SourceRef>,
    pub timestamp: DateTime<Utc>,
}

/// How the answer text was produced for this turn
enum TurnOutcome {
    CachedResponse(String),
    SearchLimited(String),
    Generated {
        text: String,
        tokens: i64,
        sources: Vec<SourceRef>,
    },
}

/// The request handler tying every capability together
pub struct ChatService {
    llm: Arc<dyn LlmProvider>,
    embeddings: Arc<dyn Embeddings>,
    memory: Arc<dyn MemoryStore>,
    conversations: Arc<dyn ConversationStore>,
    conversation_cache: Arc<ConversationCache>,
    quota: Arc<QuotaManager>,
    ranker: Arc<RagRanker>,
    evidence: Arc<EvidencePipeline>,
    cache: Arc<CacheLayer>,
    runtime: Arc<RuntimeState>,
    config: ChatConfig,
    generation: GenerationParams,
    response_cache_ttl_secs: i64,
    /// Session-only profiles for guests; never persisted
    guest_profiles: Mutex<HashMap<String, UserProfile>>,
}

#[allow(clippy::too_many_arguments)]
impl ChatService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        embeddings: Arc<dyn Embeddings>,
        memory: Arc<dyn MemoryStore>,
        conversations: Arc<dyn ConversationStore>,
        quota: Arc<QuotaManager>,
        ranker: Arc<RagRanker>,
        evidence: Arc<EvidencePipeline>,
        cache: Arc<CacheLayer>,
        runtime: Arc<RuntimeState>,
        config: ChatConfig,
        generation: GenerationParams,
        response_cache_ttl_secs: i64,
    ) -> Self {
        let conversation_cache = Arc::new(ConversationCache::new(config.conversation_cache_capacity));
        Self {
            llm,
            embeddings,
            memory,
            conversations,
            conversation_cache,
            quota,
            ranker,
            evidence,
            cache,
            runtime,
            config,
            generation,
            response_cache_ttl_secs,
            guest_profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one user turn end to end
    pub async fn handle_message(
        &self,
        request: ChatRequest,
        client: &ClientInfo,
    ) -> ChatResult<ChatResponse> {
        // 1. Resolve the principal (guests get a fingerprint identity)
        let principal =
            Principal::resolve(request.user_id.as_deref(), &client.ip, &client.user_agent);
        let user_id = principal.id();

        // 2. Admission: the only gate before any external call
        let admission = self.quota.admit(&principal, &client.ip).await?;
        let tier = match admission {
            Admission::Admitted { tier, .. } => tier,
            Admission::Denied(denial) => {
                info!("Denied {}: {}", user_id, denial.error.as_str());
                return Err(ChatError::Denied(denial));
            }
        };
        let is_paid = QuotaManager::is_paid_tier(&tier);

        // 3. Resolve the conversation, seeding history for returning users
        let requested_conversation = request
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty());
        let mut conversation_id = requested_conversation
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut fresh_conversation = self.conversation_cache.ensure(&conversation_id, &user_id);
        if !fresh_conversation {
            // Conversations are exclusive to one principal
            if let Some(owner) = self.conversation_cache.owner(&conversation_id) {
                if owner != user_id {
                    warn!("Conversation {} belongs to another principal", conversation_id);
                    conversation_id = Uuid::new_v4().to_string();
                    fresh_conversation = self.conversation_cache.ensure(&conversation_id, &user_id);
                }
            }
        }
        if fresh_conversation && !principal.is_guest() {
            if requested_conversation.is_some() {
                // Continuing a conversation whose hot entry was evicted:
                // reload that conversation's own turns
                self.reload_conversation(&user_id, &conversation_id).await;
            } else {
                self.seed_history(&user_id, &conversation_id).await;
            }
        }

        // 4. Language detection (explicit request tag wins)
        let detected_language = request
            .language
            .as_deref()
            .and_then(Language::parse)
            .unwrap_or_else(|| detect_language(&request.message));

        // 5. Persist the user message before anything can fail
        self.conversation_cache
            .append(&conversation_id, &user_id, Message::user(&request.message));
        if !principal.is_guest() {
            let _ = self
                .conversations
                .append(&user_id, &conversation_id, "user", &request.message)
                .await;
        }

        // 6. Turn signals
        let sports_mode = sports::is_sports_query(&request.message);
        let auto_fresh = sports::needs_fresh_data(&request.message);
        let rag_gate_open = gate::should_use_rag(&request.message);
        let search_needed =
            request.include_web_search || sports_mode || (auto_fresh && !rag_gate_open);
        let domain = prompt::classify_domain(&request.message);

        let outcome = self
            .produce_answer(
                &principal,
                &user_id,
                &conversation_id,
                &request,
                &tier,
                is_paid,
                detected_language,
                sports_mode,
                search_needed,
                domain,
            )
            .await?;

        let (response_text, tokens_used, sources) = match outcome {
            TurnOutcome::CachedResponse(text) => (text, 0, Vec::new()),
            TurnOutcome::SearchLimited(text) => (text, 0, Vec::new()),
            TurnOutcome::Generated {
                text,
                tokens,
                sources,
            } => (text, tokens, sources),
        };

        // Response language comes from the profile as it stood for this turn
        let language = {
            let profile = self.load_profile(&principal, &user_id).await;
            prompt::effective_language(profile.as_ref(), detected_language)
        };

        // 11. Persist the assistant turn, embed both messages, learn the
        // profile. All best-effort.
        self.persist_turn(
            &principal,
            &user_id,
            &conversation_id,
            &request.message,
            &response_text,
            detected_language,
        )
        .await;

        self.runtime.record_turn(domain, tokens_used);

        Ok(ChatResponse {
            user_id,
            conversation_id,
            message: request.message,
            response: response_text,
            language: language.as_str().to_string(),
            tokens_used,
            sources,
            timestamp: Utc::now(),
        })
    }

    /// Steps 6-10: response cache, sub-quota, fan-out, prompt, LLM call
    #[allow(clippy::too_many_arguments)]
    async fn produce_answer(
        &self,
        principal: &Principal,
        user_id: &str,
        conversation_id: &str,
        request: &ChatRequest,
        tier: &str,
        is_paid: bool,
        detected_language: Language,
        sports_mode: bool,
        search_needed: bool,
        domain: Domain,
    ) -> ChatResult<TurnOutcome> {
        let response_key = format!("{}|{}", user_id, request.message);

        // Step 6: cached final response (only when no fresh-data signal)
        if self.config.response_cache_enabled && !search_needed {
            if let Some(cached) = self
                .cache
                .get_json::<String>(RESPONSE_CACHE_PREFIX, &response_key)
                .await
            {
                debug!("Response cache hit for {}", user_id);
                return Ok(TurnOutcome::CachedResponse(cached));
            }
        }

        // Step 7: web-search sub-quota (cached reads are free)
        let mut can_search = false;
        if search_needed {
            let limit = self.quota.web_search_limit(tier, principal.is_guest());
            let used = self.quota.web_search_count(principal).await;
            let cached_exists = self
                .evidence
                .has_cached(&request.message, sports_mode)
                .await;

            if cached_exists || used < limit {
                can_search = true;
                debug!(
                    "Web search allowed for {}: cached={}, {}/{}",
                    user_id, cached_exists, used, limit
                );
            } else {
                info!("Web search sub-quota exhausted for {} ({}/{})", user_id, used, limit);
                let mut text = format!("Daily analysis limit reached ({}/day). ", limit);
                if principal.is_guest() {
                    text.push_str("Sign up for more daily analyses! ");
                } else if !is_paid {
                    text.push_str("Upgrade to the Limited Plan for 50 analyses/day! ");
                } else {
                    text.push_str("Please try again tomorrow. ");
                }
                text.push_str("\n\nI can still answer from my knowledge. What would you like to know?");
                return Ok(TurnOutcome::SearchLimited(text));
            }
        }

        // Step 8: parallel fan-out - retrieval and web evidence. Timeouts
        // degrade to empty contributions, never failures.
        let history = self.conversation_cache.history(conversation_id);
        let session_profile = self.session_profile(principal);
        let stage_timeout = Duration::from_secs(self.config.retrieval_timeout_secs);

        let rag_future = tokio::time::timeout(
            stage_timeout,
            self.ranker.build_context(
                user_id,
                &request.message,
                &history,
                is_paid,
                session_profile.as_ref(),
            ),
        );
        let evidence_future = tokio::time::timeout(stage_timeout, async {
            if can_search {
                self.evidence.gather(&request.message, sports_mode).await
            } else {
                WebEvidence::default()
            }
        });

        let (rag_result, evidence_result) = tokio::join!(rag_future, evidence_future);
        let rag_context = rag_result.unwrap_or_else(|_| {
            warn!("RAG retrieval timed out");
            Default::default()
        });
        let web = evidence_result.unwrap_or_else(|_| {
            warn!("Web evidence pipeline timed out");
            WebEvidence::default()
        });

        if web.fresh_provider_call {
            self.quota.increment_web_search(principal).await;
        }

        // Step 9: compose the prompt and call the LLM
        let profile = self.load_profile(principal, user_id).await;
        let persona = self.runtime.system_prompt();
        let module_notice = self.runtime.disabled_notice(domain);

        let mut persona_text = persona;
        if let Some(notice) = module_notice {
            persona_text.push_str(&format!("\n\n{}", notice));
        }

        let inputs = PromptInputs {
            persona: &persona_text,
            profile: profile.as_ref(),
            detected_language,
            domain,
            evidence: if web.is_empty() {
                None
            } else {
                Some(web.context.as_str())
            },
            rag_block: if rag_context.is_empty() {
                None
            } else {
                Some(rag_context.text.as_str())
            },
            fresh_data_required: search_needed,
            sports_mode,
        };
        let system_prompt = prompt::compose_system_prompt(&inputs);

        let tail_start = history.len().saturating_sub(self.config.history_limit);
        let tail = history[tail_start..].to_vec();

        let llm_response = self
            .llm
            .generate(tail, &system_prompt, self.generation)
            .await
            .map_err(|e| {
                warn!("LLM call failed: {}", e);
                ChatError::LlmFailure(e.to_string())
            })?;

        // Step 10: cache the response when no fresh data was involved
        if self.config.response_cache_enabled && !search_needed {
            self.cache
                .set_json(
                    RESPONSE_CACHE_PREFIX,
                    &response_key,
                    &llm_response.text,
                    self.response_cache_ttl_secs,
                )
                .await;
        }

        Ok(TurnOutcome::Generated {
            tokens: llm_response.total_tokens(),
            text: llm_response.text,
            sources: web.sources,
        })
    }

    /// Reload one conversation's turns from the vector store after a hot
    /// cache eviction
    async fn reload_conversation(&self, user_id: &str, conversation_id: &str) {
        let hits = match self
            .memory
            .conversation_history(user_id, conversation_id, self.config.history_seed_limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Could not reload conversation {}: {}", conversation_id, e);
                return;
            }
        };
        if hits.is_empty() {
            return;
        }

        let messages = hits
            .into_iter()
            .map(|hit| {
                let role = hit
                    .metadata
                    .get("role")
                    .and_then(|v| v.as_str())
                    .unwrap_or("user")
                    .to_string();
                let content = hit
                    .content
                    .strip_prefix(USER_MEMORY_PREFIX)
                    .or_else(|| hit.content.strip_prefix(ASSISTANT_MEMORY_PREFIX))
                    .unwrap_or(&hit.content)
                    .to_string();
                Message { role, content }
            })
            .collect();
        self.conversation_cache.seed(conversation_id, user_id, messages);
    }

    /// Seed an empty in-memory conversation from the vector store so a
    /// returning user keeps their context
    async fn seed_history(&self, user_id: &str, conversation_id: &str) {
        let query_vec = match self.embeddings.encode(HISTORY_SEED_QUERY).await {
            Ok(Some(vec)) => vec,
            _ => return,
        };

        let hits = match self
            .memory
            .search_similar(
                user_id,
                &query_vec,
                self.config.history_seed_limit,
                0.0,
                Some(MemoryKind::Conversation),
            )
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Could not seed conversation history: {}", e);
                return;
            }
        };
        if hits.is_empty() {
            return;
        }

        let mut messages = Vec::with_capacity(hits.len());
        // Reverse to chronological order
        for hit in hits.into_iter().rev() {
            let role = hit
                .metadata
                .get("role")
                .and_then(|v| v.as_str())
                .unwrap_or("user")
                .to_string();
            let content = hit
                .content
                .strip_prefix(USER_MEMORY_PREFIX)
                .or_else(|| hit.content.strip_prefix(ASSISTANT_MEMORY_PREFIX))
                .unwrap_or(&hit.content)
                .to_string();
            messages.push(Message { role, content });
        }

        debug!("Seeded {} messages for returning user {}", messages.len(), user_id);
        self.conversation_cache.seed(conversation_id, user_id, messages);
    }

    /// Append the assistant message, store both turns in vector memory for
    /// registered users, and merge learned preferences
    async fn persist_turn(
        &self,
        principal: &Principal,
        user_id: &str,
        conversation_id: &str,
        user_message: &str,
        response_text: &str,
        detected_language: Language,
    ) {
        self.conversation_cache.append(
            conversation_id,
            user_id,
            Message::assistant(response_text),
        );
        if !principal.is_guest() {
            let _ = self
                .conversations
                .append(user_id, conversation_id, "assistant", response_text)
                .await;
        }

        let delta = profile::learn_from_message(user_message, detected_language);

        if principal.is_guest() {
            // Session-only: guests leave no durable trace
            if !delta.is_empty() {
                let mut profiles = self.guest_profiles.lock();
                let profile = profiles
                    .entry(user_id.to_string())
                    .or_insert_with(|| UserProfile::empty(user_id));
                profile.apply_delta(&delta);
            }
            return;
        }

        self.store_turn_memories(
            user_id,
            conversation_id,
            user_message,
            response_text,
            detected_language,
        )
        .await;

        if let Err(e) = self.memory.update_user_profile(user_id, &delta).await {
            warn!("Profile update failed for {}: {}", user_id, e);
        }
    }

    async fn store_turn_memories(
        &self,
        user_id: &str,
        conversation_id: &str,
        user_message: &str,
        response_text: &str,
        detected_language: Language,
    ) {
        let is_personal = profile::contains_personal_info(user_message);
        if is_personal {
            debug!("Personal information detected - flagged for priority retrieval");
        }

        let user_content = format!("{}{}", USER_MEMORY_PREFIX, user_message);
        let assistant_snippet: String =
            response_text.chars().take(ASSISTANT_MEMORY_CHARS).collect();
        let assistant_content = format!("{}{}", ASSISTANT_MEMORY_PREFIX, assistant_snippet);

        let texts = vec![user_content.clone(), assistant_content.clone()];
        let vectors = match self.embeddings.encode_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!("Turn embedding failed: {}", e);
                return;
            }
        };

        let now = Utc::now().to_rfc3339();
        let query_snippet: String = user_message.chars().take(200).collect();
        let records = [
            vectors.first().cloned().flatten().map(|embedding| NewMemory {
                user_id: user_id.to_string(),
                conversation_id: Some(conversation_id.to_string()),
                content: user_content,
                embedding,
                metadata: serde_json::json!({
                    "role": "user",
                    "language": detected_language.as_str(),
                    "timestamp": now,
                    "is_personal_info": is_personal,
                }),
                kind: MemoryKind::Conversation,
            }),
            vectors.get(1).cloned().flatten().map(|embedding| NewMemory {
                user_id: user_id.to_string(),
                conversation_id: Some(conversation_id.to_string()),
                content: assistant_content,
                embedding,
                metadata: serde_json::json!({
                    "role": "assistant",
                    "language": detected_language.as_str(),
                    "timestamp": now,
                    "query": query_snippet,
                }),
                kind: MemoryKind::Conversation,
            }),
        ];

        for record in records.into_iter().flatten() {
            if let Err(e) = self.memory.add_memory(record).await {
                warn!("Memory write failed: {}", e);
            }
        }
    }

    async fn load_profile(&self, principal: &Principal, user_id: &str) -> Option<UserProfile> {
        if principal.is_guest() {
            return self.session_profile(principal);
        }
        match self.memory.get_user_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Profile load failed: {}", e);
                None
            }
        }
    }

    fn session_profile(&self, principal: &Principal) -> Option<UserProfile> {
        if !principal.is_guest() {
            return None;
        }
        self.guest_profiles.lock().get(&principal.id()).cloned()
    }

    // Conversation management (sidebar and right-to-delete)

    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ConversationSummary>> {
        self.conversations.list_by_user(user_id, limit).await
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> anyhow::Result<Vec<crate::conversation::StoredMessage>> {
        self.conversations.get(conversation_id).await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> anyhow::Result<u64> {
        let deleted = self.conversations.delete(conversation_id).await?;
        if let Err(e) = self.memory.delete_conversation(conversation_id).await {
            warn!("Vector cleanup for conversation {} failed: {}", conversation_id, e);
        }
        self.conversation_cache.remove(conversation_id);
        Ok(deleted)
    }

    pub async fn delete_all_conversations(&self, user_id: &str) -> anyhow::Result<u64> {
        let deleted = self.conversations.delete_all(user_id).await?;
        if let Err(e) = self.memory.delete_user_data(user_id).await {
            warn!("Vector cleanup for user {} failed: {}", user_id, e);
        }
        self.conversation_cache.remove_user(user_id);
        Ok(deleted)
    }
}
