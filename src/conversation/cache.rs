// src/conversation/cache.rs
// Bounded in-process cache of hot conversation histories

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use crate::llm::Message;

struct CachedConversation {
    user_id: String,
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_access: Instant,
}

/// LRU-bounded working set of conversation histories.
///
/// This is the only place guest conversations live; registered users also
/// have the durable log. Eviction is per-conversation, least recently
/// touched first.
pub struct ConversationCache {
    inner: Mutex<HashMap<String, CachedConversation>>,
    capacity: usize,
}

impl ConversationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Create the conversation entry if absent. Returns true when created.
    pub fn ensure(&self, conversation_id: &str, user_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(conversation_id) {
            return false;
        }
        Self::evict_if_full(&mut inner, self.capacity);
        let now = Utc::now();
        inner.insert(
            conversation_id.to_string(),
            CachedConversation {
                user_id: user_id.to_string(),
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
                last_access: Instant::now(),
            },
        );
        true
    }

    /// Replace the history of an (empty) conversation, e.g. when seeding
    /// from the vector store
    pub fn seed(&self, conversation_id: &str, user_id: &str, messages: Vec<Message>) {
        let mut inner = self.inner.lock();
        Self::evict_if_full(&mut inner, self.capacity);
        let now = Utc::now();
        let entry = inner
            .entry(conversation_id.to_string())
            .or_insert_with(|| CachedConversation {
                user_id: user_id.to_string(),
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
                last_access: Instant::now(),
            });
        if entry.messages.is_empty() {
            debug!(
                "Seeded conversation {} with {} messages",
                conversation_id,
                messages.len()
            );
            entry.messages = messages;
        }
        entry.last_access = Instant::now();
    }

    pub fn append(&self, conversation_id: &str, user_id: &str, message: Message) {
        let mut inner = self.inner.lock();
        Self::evict_if_full(&mut inner, self.capacity);
        let now = Utc::now();
        let entry = inner
            .entry(conversation_id.to_string())
            .or_insert_with(|| CachedConversation {
                user_id: user_id.to_string(),
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
                last_access: Instant::now(),
            });
        entry.messages.push(message);
        entry.updated_at = now;
        entry.last_access = Instant::now();
    }

    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        let mut inner = self.inner.lock();
        match inner.get_mut(conversation_id) {
            Some(entry) => {
                entry.last_access = Instant::now();
                entry.messages.clone()
            }
            None => Vec::new(),
        }
    }

    pub fn owner(&self, conversation_id: &str) -> Option<String> {
        self.inner
            .lock()
            .get(conversation_id)
            .map(|e| e.user_id.clone())
    }

    pub fn remove(&self, conversation_id: &str) {
        self.inner.lock().remove(conversation_id);
    }

    pub fn remove_user(&self, user_id: &str) {
        self.inner.lock().retain(|_, e| e.user_id != user_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn evict_if_full(inner: &mut HashMap<String, CachedConversation>, capacity: usize) {
        while inner.len() >= capacity {
            let oldest = inner
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    debug!("Evicting conversation {} from hot cache", key);
                    inner.remove(&key);
                }
                None => break,
            }
        }
    }
}
