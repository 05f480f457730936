// src/config/server.rs
// Database, cache backend, and infrastructure configuration

use serde::{Deserialize, Serialize};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: super::helpers::env_or("DATABASE_URL", "postgresql://localhost/samvad"),
            max_connections: super::helpers::env_parsed("DATABASE_MAX_CONNECTIONS", 10),
        }
    }
}

/// Cache backend configuration
///
/// When `redis_url` is empty or the server is unreachable at startup, the
/// cache layer runs on the in-process map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub redis_url: String,
    pub response_ttl_secs: i64,
    pub web_search_counter_ttl_secs: i64,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: super::helpers::env_or("REDIS_URL", ""),
            response_ttl_secs: super::helpers::env_parsed("RESPONSE_CACHE_TTL", 3600),
            web_search_counter_ttl_secs: super::helpers::env_parsed("WEB_SEARCH_COUNTER_TTL", 86400),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: super::helpers::env_or("LOG_LEVEL", "info"),
        }
    }
}
