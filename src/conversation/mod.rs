// src/conversation/mod.rs

//! Durable conversation log, separate from vector memory so history and the
//! sidebar stay available when the vector index is degraded.

pub mod cache;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

pub use cache::ConversationCache;

/// Messages longer than this are truncated on write
pub const MAX_MESSAGE_BYTES: usize = 4096;
const PREVIEW_CHARS: usize = 120;

/// One persisted turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Sidebar row for one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub preview: String,
}

/// Durable conversation log capability
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<()>;

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationSummary>>;

    /// Ordered messages of one conversation (oldest first)
    async fn get(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;

    async fn delete(&self, conversation_id: &str) -> Result<u64>;

    async fn delete_all(&self, user_id: &str) -> Result<u64>;
}

/// Byte-bounded truncation that never splits a character
pub fn truncate_bytes(content: &str, max_bytes: usize) -> &str {
    if content.len() <= max_bytes {
        return content;
    }
    let mut end = max_bytes;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// Postgres conversation log
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_messages (
                id BIGSERIAL PRIMARY KEY,
                conversation_id VARCHAR(255) NOT NULL,
                user_id VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_conv_user ON conversation_messages(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_conv_conv ON conversation_messages(conversation_id)",
            "CREATE INDEX IF NOT EXISTS idx_conv_user_conv ON conversation_messages(user_id, conversation_id)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn append(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        let bounded = truncate_bytes(content, MAX_MESSAGE_BYTES);

        let result = sqlx::query(
            r#"
            INSERT INTO conversation_messages (conversation_id, user_id, role, content)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(role)
        .bind(bounded)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            // History is best-effort; the turn itself must not fail on it
            warn!("Could not log conversation message: {}", e);
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id,
                   MIN(created_at) AS created_at,
                   MAX(created_at) AS updated_at,
                   COUNT(*) AS message_count,
                   (array_agg(content ORDER BY created_at, id)
                        FILTER (WHERE role = 'user'))[1] AS first_user_msg
            FROM conversation_messages
            WHERE user_id = $1
            GROUP BY conversation_id
            ORDER BY MAX(created_at) DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let first_msg: Option<String> = row.try_get("first_user_msg").ok().flatten();
                let preview = first_msg
                    .map(|m| m.chars().take(PREVIEW_CHARS).collect())
                    .unwrap_or_else(|| "Conversation".to_string());

                ConversationSummary {
                    id: row.try_get("conversation_id").unwrap_or_default(),
                    created_at: row.try_get("created_at").ok(),
                    updated_at: row.try_get("updated_at").ok(),
                    message_count: row.try_get("message_count").unwrap_or(0),
                    preview,
                }
            })
            .collect())
    }

    async fn get(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at
            FROM conversation_messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StoredMessage {
                role: row.try_get("role").unwrap_or_default(),
                content: row.try_get("content").unwrap_or_default(),
                created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    async fn delete(&self, conversation_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_messages WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        info!(
            "Deleted {} conversation messages for {}",
            result.rows_affected(),
            user_id
        );
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_bytes_short_content_untouched() {
        assert_eq!(truncate_bytes("hello", MAX_MESSAGE_BYTES), "hello");
    }

    #[test]
    fn test_truncate_bytes_bounds_long_content() {
        let long = "a".repeat(MAX_MESSAGE_BYTES + 100);
        assert_eq!(truncate_bytes(&long, MAX_MESSAGE_BYTES).len(), MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_truncate_bytes_respects_char_boundaries() {
        // Devanagari chars are 3 bytes; the cut must land on a boundary
        let hindi = "न".repeat(2000);
        let truncated = truncate_bytes(&hindi, MAX_MESSAGE_BYTES);
        assert!(truncated.len() <= MAX_MESSAGE_BYTES);
        assert!(truncated.chars().all(|c| c == 'न'));
    }
}
