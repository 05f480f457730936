// src/rag/ranker.rs

//! Hybrid RAG ranker.
//!
//! Fuses three candidate pools - the user's vector memories, the shared
//! knowledge namespace, and the in-session conversation window - under one
//! composite score, then filters, re-ranks, and formats the survivors.
//!
//! Scores:
//!   memories      0.7 + 0.3*keyword_overlap + personal_boost
//!   knowledge     0.6 + 0.3*keyword_overlap
//!   conversation  0.4*recency + 0.3*keyword_overlap + 0.3
//! Personal boost is +0.3 for flagged metadata or declarative content.
//! Threshold is 0.4 for personal-info queries, 0.5 otherwise.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::gate;
use crate::config::chat::RagConfig;
use crate::llm::{Embeddings, Message};
use crate::memory::{MemoryStore, UserProfile};
use crate::profile::contains_personal_info;

const MEMORY_BASE_SCORE: f64 = 0.7;
const KNOWLEDGE_BASE_SCORE: f64 = 0.6;
const KEYWORD_WEIGHT: f64 = 0.3;
const PERSONAL_BOOST: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.4;
const CONVERSATION_FLOOR: f64 = 0.3;
const PERSONAL_THRESHOLD: f64 = 0.4;
const DEFAULT_THRESHOLD: f64 = 0.5;
const SNIPPET_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Memory,
    Knowledge,
    Conversation,
}

impl SourceKind {
    fn tag(&self) -> &'static str {
        match self {
            SourceKind::Memory => "personal memory",
            SourceKind::Knowledge => "knowledge base",
            SourceKind::Conversation => "recent context",
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    id: i64,
    content: String,
    kind: SourceKind,
    score: f64,
    is_personal: bool,
}

/// Assembled retrieval context for one turn
#[derive(Debug, Clone, Default)]
pub struct RagContext {
    pub text: String,
    /// Whether full retrieval ran (false = profile header only)
    pub used_retrieval: bool,
}

impl RagContext {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Context assembly over memory + embeddings capabilities
pub struct RagRanker {
    memory: Arc<dyn MemoryStore>,
    embeddings: Arc<dyn Embeddings>,
    config: RagConfig,
}

impl RagRanker {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        embeddings: Arc<dyn Embeddings>,
        config: RagConfig,
    ) -> Self {
        Self {
            memory,
            embeddings,
            config,
        }
    }

    /// Build the context block for a turn.
    ///
    /// The profile header is always produced (cheap); full retrieval only
    /// runs when the cost gate allows it, and the embedding model is never
    /// called otherwise. `session_profile` covers guests, whose profile
    /// lives only in the orchestrator's session map.
    pub async fn build_context(
        &self,
        user_id: &str,
        query: &str,
        history: &[Message],
        is_paid: bool,
        session_profile: Option<&UserProfile>,
    ) -> RagContext {
        let stored_profile = match self.memory.get_user_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Profile load failed for {}: {}", user_id, e);
                None
            }
        };
        let profile = stored_profile.as_ref().or(session_profile);

        let mut header = profile.map(Self::profile_header).unwrap_or_default();
        if header.is_empty() {
            // Profile store degraded: recover at least the name from history
            let user_turns: Vec<&str> = history
                .iter()
                .rev()
                .filter(|m| m.is_user())
                .map(|m| m.content.as_str())
                .collect();
            if let Some(name) = crate::profile::find_name_in_history(user_turns) {
                header = format!("## Important: User's name is {}\n", name);
            }
        }

        if !gate::should_use_rag(query) {
            debug!("Cost gate: skipping retrieval for '{}'", query);
            return RagContext {
                text: header,
                used_retrieval: false,
            };
        }

        let query_vec = match self.embeddings.encode(query).await {
            Ok(Some(vec)) => vec,
            Ok(None) => {
                return RagContext {
                    text: header,
                    used_retrieval: false,
                }
            }
            Err(e) => {
                warn!("Query embedding failed: {}", e);
                return RagContext {
                    text: header,
                    used_retrieval: false,
                };
            }
        };

        let candidates = self
            .collect_candidates(user_id, query, &query_vec, history, is_paid)
            .await;
        let personal_query = gate::is_personal_query(query);
        let selected = self.rank(candidates, personal_query, is_paid);

        if selected.is_empty() {
            return RagContext {
                text: header,
                used_retrieval: true,
            };
        }

        let mut text = String::new();
        if !header.is_empty() {
            text.push_str(&header);
            text.push('\n');
        }
        text.push_str(&format!(
            "RELEVANT CONTEXT (top {} from your history):\n",
            selected.len()
        ));
        for candidate in &selected {
            let snippet = truncate_chars(&candidate.content, SNIPPET_CHARS);
            text.push_str(&format!(
                "- [{}] (relevance {:.2}) {}\n",
                candidate.kind.tag(),
                candidate.score,
                snippet
            ));
        }

        RagContext {
            text,
            used_retrieval: true,
        }
    }

    /// Small context block listing known facts about the user
    fn profile_header(profile: &UserProfile) -> String {
        let mut header = String::new();

        if let Some(name) = profile.preference_str("name") {
            header.push_str(&format!("## Important: User's name is {}\n", name));
        }

        let mut facts = String::new();
        if let Some(location) = profile.preference_str("location") {
            facts.push_str(&format!("- Location: {}\n", location));
        }
        if let Some(language) = profile.preference_str("preferred_language") {
            facts.push_str(&format!("- Preferred language: {}\n", language));
        }
        if !profile.interests.is_empty() {
            facts.push_str(&format!("- Interests: {}\n", profile.interests.join(", ")));
        }
        let likes = profile.preference_list("likes");
        if !likes.is_empty() {
            let top: Vec<&str> = likes.iter().take(3).map(|s| s.as_str()).collect();
            facts.push_str(&format!("- Things you like: {}\n", top.join(", ")));
        }

        if !facts.is_empty() {
            header.push_str("## What I know about you:\n");
            header.push_str(&facts);
        }
        header
    }

    async fn collect_candidates(
        &self,
        user_id: &str,
        query: &str,
        query_vec: &[f32],
        history: &[Message],
        is_paid: bool,
    ) -> Vec<Candidate> {
        let query_keywords: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.to_string())
            .collect();

        let memory_limit = if is_paid {
            self.config.memory_limit_paid
        } else {
            self.config.memory_limit_free
        };

        // Personal memories and the shared knowledge namespace in one pass
        let (memories, knowledge) = tokio::join!(
            self.memory.search_similar(
                user_id,
                query_vec,
                memory_limit,
                self.config.similarity_threshold,
                None,
            ),
            self.memory.search_similar(
                &self.config.knowledge_namespace,
                query_vec,
                self.config.knowledge_limit,
                self.config.similarity_threshold,
                None,
            ),
        );

        let mut candidates = Vec::new();

        match memories {
            Ok(hits) => {
                for hit in hits {
                    let keyword_score = keyword_overlap(&query_keywords, &hit.content);
                    let flagged = hit
                        .metadata
                        .get("is_personal_info")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    let is_personal = flagged || contains_personal_info(&hit.content);
                    let boost = if is_personal { PERSONAL_BOOST } else { 0.0 };

                    candidates.push(Candidate {
                        id: hit.id,
                        content: hit.content,
                        kind: SourceKind::Memory,
                        score: MEMORY_BASE_SCORE + KEYWORD_WEIGHT * keyword_score + boost,
                        is_personal,
                    });
                }
            }
            Err(e) => warn!("Memory search failed: {}", e),
        }

        match knowledge {
            Ok(hits) => {
                for hit in hits {
                    let keyword_score = keyword_overlap(&query_keywords, &hit.content);
                    candidates.push(Candidate {
                        id: hit.id,
                        content: hit.content,
                        kind: SourceKind::Knowledge,
                        score: KNOWLEDGE_BASE_SCORE + KEYWORD_WEIGHT * keyword_score,
                        is_personal: false,
                    });
                }
            }
            Err(e) => warn!("Knowledge search failed: {}", e),
        }

        // Recency-weighted in-session window; ids offset past any plausible
        // store id so ordering ties stay deterministic
        let history_limit = if is_paid {
            self.config.history_limit_paid
        } else {
            self.config.history_limit_free
        };
        let start = history.len().saturating_sub(history_limit);
        let window = &history[start..];
        for (idx, message) in window.iter().enumerate() {
            let recency = (idx + 1) as f64 / window.len() as f64;
            let keyword_score = keyword_overlap(&query_keywords, &message.content);
            candidates.push(Candidate {
                id: i64::MAX - window.len() as i64 + idx as i64,
                content: message.content.clone(),
                kind: SourceKind::Conversation,
                score: RECENCY_WEIGHT * recency
                    + KEYWORD_WEIGHT * keyword_score
                    + CONVERSATION_FLOOR,
                is_personal: false,
            });
        }

        candidates
    }

    /// Filter by threshold, sort deterministically, pin personal facts first,
    /// and cut to the plan's context size
    fn rank(&self, candidates: Vec<Candidate>, personal_query: bool, is_paid: bool) -> Vec<Candidate> {
        let threshold = if personal_query {
            PERSONAL_THRESHOLD
        } else {
            DEFAULT_THRESHOLD
        };

        let mut survivors: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.score >= threshold)
            .collect();

        survivors.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        let (personal, other): (Vec<Candidate>, Vec<Candidate>) =
            survivors.into_iter().partition(|c| c.is_personal);
        let mut ranked = personal;
        ranked.extend(other);

        let top_k = if is_paid {
            self.config.top_k_paid
        } else {
            self.config.top_k_free
        };
        ranked.truncate(top_k);
        ranked
    }
}

fn keyword_overlap(query_keywords: &HashSet<String>, content: &str) -> f64 {
    if query_keywords.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let matched = query_keywords
        .iter()
        .filter(|kw| content_lower.contains(kw.as_str()))
        .count();
    matched as f64 / query_keywords.len() as f64
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_overlap_ratio() {
        let keywords: HashSet<String> = ["my", "name", "ravi"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!((keyword_overlap(&keywords, "User said: my name is Ravi") - 1.0).abs() < 1e-9);
        assert!((keyword_overlap(&keywords, "name only") - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(keyword_overlap(&keywords, "nothing relevant here"), 0.0);
    }

    #[test]
    fn test_truncate_chars_preserves_short_text() {
        assert_eq!(truncate_chars("short", 300), "short");
        let long = "x".repeat(400);
        let truncated = truncate_chars(&long, 300);
        assert_eq!(truncated.chars().count(), 303); // 300 + ellipsis
    }

    #[test]
    fn test_memory_with_full_overlap_and_personal_boost_tops_ranking() {
        // A memory matching every query keyword and flagged personal scores
        // 0.7 + 0.3 + 0.3 = 1.3, above anything a conversation item can reach
        let keywords: HashSet<String> =
            ["name"].iter().map(|s| s.to_string()).collect();
        let memory_score =
            MEMORY_BASE_SCORE + KEYWORD_WEIGHT * keyword_overlap(&keywords, "my name is ravi")
                + PERSONAL_BOOST;
        let best_conversation = RECENCY_WEIGHT * 1.0 + KEYWORD_WEIGHT * 1.0 + CONVERSATION_FLOOR;
        assert!(memory_score > best_conversation);
    }
}
