// src/cache/mod.rs

//! Namespaced TTL cache shared by the whole pipeline.
//!
//! Two backends behind one interface:
//! 1. Redis (when configured and reachable at startup)
//! 2. In-process map with expiry timestamps (always available)
//!
//! Every backend failure degrades to a cache miss - callers never see an
//! error from this layer. Writes are last-writer-wins.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info, warn};

/// Cache statistics for monitoring
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub hits: i64,
    pub misses: i64,
    pub hit_rate: f64,
}

struct MemoryEntry {
    payload: String,
    expires_at: i64,
}

/// Keyed TTL store with namespaced prefixes
pub struct CacheLayer {
    redis: Option<redis::aio::ConnectionManager>,
    memory: RwLock<HashMap<String, MemoryEntry>>,
    hits: AtomicI64,
    misses: AtomicI64,
}

impl CacheLayer {
    /// In-process cache only (used when no KV backend is configured, and in tests)
    pub fn in_process() -> Self {
        Self {
            redis: None,
            memory: RwLock::new(HashMap::new()),
            hits: AtomicI64::new(0),
            misses: AtomicI64::new(0),
        }
    }

    /// Connect to the KV backend; any failure falls back to the in-process map
    pub async fn connect(redis_url: &str) -> Self {
        if redis_url.is_empty() {
            return Self::in_process();
        }

        match Self::try_connect(redis_url).await {
            Ok(manager) => {
                info!("Cache layer connected to Redis");
                Self {
                    redis: Some(manager),
                    memory: RwLock::new(HashMap::new()),
                    hits: AtomicI64::new(0),
                    misses: AtomicI64::new(0),
                }
            }
            Err(e) => {
                warn!("Redis unavailable ({}), using in-process cache", e);
                Self::in_process()
            }
        }
    }

    async fn try_connect(redis_url: &str) -> anyhow::Result<redis::aio::ConnectionManager> {
        let client = redis::Client::open(redis_url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(manager)
    }

    /// Keys are namespaced `{prefix}:{digest}`. Hashing the material keeps
    /// arbitrary user text (queries, URLs, messages) out of backend keys and
    /// gives every entry a fixed-size address.
    fn full_key(prefix: &str, key_material: &str) -> String {
        format!("{}:{:x}", prefix, Sha256::digest(key_material.as_bytes()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, prefix: &str, key_material: &str) -> Option<T> {
        let key = Self::full_key(prefix, key_material);
        let payload = self.get_raw(&key).await;

        match payload {
            Some(raw) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                match serde_json::from_str(&raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        // Malformed stored JSON is an integrity problem: drop it
                        warn!("Dropping malformed cache entry {}: {}", prefix, e);
                        self.delete_raw(&key).await;
                        None
                    }
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        prefix: &str,
        key_material: &str,
        value: &T,
        ttl_secs: i64,
    ) {
        let key = Self::full_key(prefix, key_material);
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                warn!("Cache serialize failed for {}: {}", prefix, e);
                return;
            }
        };
        self.set_raw(&key, payload, ttl_secs).await;
    }

    pub async fn delete(&self, prefix: &str, key_material: &str) {
        let key = Self::full_key(prefix, key_material);
        self.delete_raw(&key).await;
    }

    /// Remove every key under a prefix
    pub async fn clear_prefix(&self, prefix: &str) {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let pattern = format!("{}:*", prefix);
            let keys: Result<Vec<String>, _> = redis::cmd("KEYS")
                .arg(&pattern)
                .query_async(&mut conn)
                .await;
            match keys {
                Ok(keys) if !keys.is_empty() => {
                    let result: Result<i64, _> =
                        redis::cmd("DEL").arg(&keys).query_async(&mut conn).await;
                    if let Err(e) = result {
                        warn!("Redis DEL failed for prefix {}: {}", prefix, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Redis KEYS failed for prefix {}: {}", prefix, e),
            }
        }

        let mut memory = self.memory.write();
        memory.retain(|k, _| !k.starts_with(&format!("{}:", prefix)));
        debug!("Cleared cache prefix {}", prefix);
    }

    /// Atomically bump a counter key, refreshing its TTL on first write.
    /// Returns the new count.
    pub async fn increment_counter(&self, prefix: &str, key_material: &str, ttl_secs: i64) -> i64 {
        let key = Self::full_key(prefix, key_material);

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let count: Result<i64, _> = redis::cmd("INCR").arg(&key).query_async(&mut conn).await;
            match count {
                Ok(count) => {
                    if count == 1 {
                        let _: Result<i64, _> = redis::cmd("EXPIRE")
                            .arg(&key)
                            .arg(ttl_secs)
                            .query_async(&mut conn)
                            .await;
                    }
                    return count;
                }
                Err(e) => warn!("Redis INCR failed for {}: {}", prefix, e),
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut memory = self.memory.write();
        let entry = memory.entry(key).or_insert_with(|| MemoryEntry {
            payload: "0".to_string(),
            expires_at: now + ttl_secs,
        });
        if entry.expires_at <= now {
            entry.payload = "0".to_string();
            entry.expires_at = now + ttl_secs;
        }
        let count = entry.payload.parse::<i64>().unwrap_or(0) + 1;
        entry.payload = count.to_string();
        count
    }

    pub async fn get_counter(&self, prefix: &str, key_material: &str) -> i64 {
        let key = Self::full_key(prefix, key_material);
        self.get_raw(&key)
            .await
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        self.purge_expired();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            memory_entries: self.memory.read().len(),
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<Option<String>, _> =
                redis::cmd("GET").arg(key).query_async(&mut conn).await;
            match result {
                Ok(value) => return value,
                Err(e) => warn!("Redis GET failed: {}", e),
            }
        }

        let now = chrono::Utc::now().timestamp();
        let memory = self.memory.read();
        match memory.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.payload.clone()),
            // TTL enforced on read: expired entries are a miss
            _ => None,
        }
    }

    async fn set_raw(&self, key: &str, payload: String, ttl_secs: i64) {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<(), _> = redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_secs)
                .arg(&payload)
                .query_async(&mut conn)
                .await;
            match result {
                Ok(_) => return,
                Err(e) => warn!("Redis SETEX failed: {}", e),
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut memory = self.memory.write();
        memory.insert(
            key.to_string(),
            MemoryEntry {
                payload,
                expires_at: now + ttl_secs,
            },
        );
        if memory.len() > 4096 {
            memory.retain(|_, entry| entry.expires_at > now);
        }
    }

    async fn delete_raw(&self, key: &str) {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<i64, _> = redis::cmd("DEL").arg(key).query_async(&mut conn).await;
            if let Err(e) = result {
                warn!("Redis DEL failed: {}", e);
            }
        }
        self.memory.write().remove(key);
    }

    fn purge_expired(&self) {
        let now = chrono::Utc::now().timestamp();
        self.memory.write().retain(|_, entry| entry.expires_at > now);
    }
}
