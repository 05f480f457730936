// src/memory/pgvector.rs
// Postgres + pgvector implementation of the memory store

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use super::{
    is_guest_id, MemoryHit, MemoryKind, MemoryStore, NewMemory, ProfileDelta, UserProfile,
};

/// Vector memory on Postgres with the pgvector extension.
///
/// Initialization is best-effort: when the extension or tables cannot be
/// created the store flips into degraded mode and every operation returns
/// empty results instead of failing the request.
pub struct PgVectorStore {
    pool: PgPool,
    dimension: usize,
    available: AtomicBool,
}

impl PgVectorStore {
    pub async fn new(pool: PgPool, dimension: usize) -> Self {
        let store = Self {
            pool,
            dimension,
            available: AtomicBool::new(true),
        };

        match store.ensure_schema().await {
            Ok(()) => info!("Vector memory store initialized ({}d)", dimension),
            Err(e) => {
                warn!(
                    "Could not initialize vector store, memory disabled: {}",
                    e
                );
                store.available.store(false, Ordering::SeqCst);
            }
        }

        store
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS chat_vectors (
                id BIGSERIAL PRIMARY KEY,
                user_id VARCHAR(255) NOT NULL,
                conversation_id VARCHAR(255),
                content TEXT NOT NULL,
                embedding vector({dim}),
                metadata JSONB,
                type VARCHAR(50) NOT NULL DEFAULT 'conversation',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            dim = self.dimension
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS chat_vectors_embedding_idx
            ON chat_vectors USING ivfflat (embedding vector_cosine_ops)
            WITH (lists = 100)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS chat_vectors_user_idx ON chat_vectors(user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id VARCHAR(255) PRIMARY KEY,
                preferences JSONB NOT NULL DEFAULT '{}',
                interests JSONB NOT NULL DEFAULT '[]',
                conversation_count BIGINT NOT NULL DEFAULT 0,
                total_messages BIGINT NOT NULL DEFAULT 0,
                first_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_active TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// pgvector text literal: `[x1,x2,...]`
    fn vector_literal(embedding: &[f32]) -> String {
        let mut out = String::with_capacity(embedding.len() * 10 + 2);
        out.push('[');
        for (i, v) in embedding.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&v.to_string());
        }
        out.push(']');
        out
    }

    fn is_missing_relation(err: &sqlx::Error) -> bool {
        err.to_string().contains("does not exist")
    }

    async fn insert_memory(&self, memory: &NewMemory, vector: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO chat_vectors (user_id, conversation_id, content, embedding, metadata, type)
            VALUES ($1, $2, $3, $4::vector, $5, $6)
            "#,
        )
        .bind(&memory.user_id)
        .bind(&memory.conversation_id)
        .bind(&memory.content)
        .bind(vector)
        .bind(&memory.metadata)
        .bind(memory.kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_hit(row: &sqlx::postgres::PgRow) -> MemoryHit {
        let metadata: Option<serde_json::Value> = row.try_get("metadata").ok().flatten();
        let kind_raw: String = row
            .try_get("type")
            .unwrap_or_else(|_| "conversation".to_string());
        let created_at: DateTime<Utc> = row.try_get("created_at").unwrap_or_else(|_| Utc::now());

        MemoryHit {
            id: row.try_get("id").unwrap_or_default(),
            content: row.try_get("content").unwrap_or_default(),
            metadata: metadata.unwrap_or(serde_json::Value::Null),
            kind: MemoryKind::from_str(&kind_raw).unwrap_or(MemoryKind::Conversation),
            similarity: row.try_get("similarity").unwrap_or(0.0),
            created_at,
        }
    }

    fn row_to_profile(user_id: &str, row: &sqlx::postgres::PgRow) -> UserProfile {
        let preferences: serde_json::Value = row
            .try_get("preferences")
            .unwrap_or(serde_json::Value::Null);
        let interests: serde_json::Value =
            row.try_get("interests").unwrap_or(serde_json::Value::Null);

        UserProfile {
            user_id: user_id.to_string(),
            preferences: preferences
                .as_object()
                .cloned()
                .unwrap_or_else(serde_json::Map::new),
            interests: interests
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            conversation_count: row.try_get("conversation_count").unwrap_or(0),
            total_messages: row.try_get("total_messages").unwrap_or(0),
            first_seen: row.try_get("first_seen").unwrap_or_else(|_| Utc::now()),
            last_active: row.try_get("last_active").unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[async_trait]
impl MemoryStore for PgVectorStore {
    async fn add_memory(&self, memory: NewMemory) -> Result<bool> {
        // Guests never own persisted memory
        if is_guest_id(&memory.user_id) {
            debug!("Skipping memory write for guest principal");
            return Ok(false);
        }

        if !self.is_available() {
            return Ok(false);
        }

        if memory.embedding.len() != self.dimension {
            error!(
                "Embedding dimension mismatch: expected {}, got {} - record skipped",
                self.dimension,
                memory.embedding.len()
            );
            return Ok(false);
        }

        let vector = Self::vector_literal(&memory.embedding);
        match self.insert_memory(&memory, &vector).await {
            Ok(()) => Ok(true),
            Err(e) if Self::is_missing_relation(&e) => {
                // Table vanished underneath us: recreate and retry once
                warn!("Memory table missing, recreating schema: {}", e);
                self.ensure_schema().await?;
                self.insert_memory(&memory, &vector).await?;
                Ok(true)
            }
            Err(e) => {
                warn!("Memory write failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn search_similar(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
        threshold: f64,
        kind: Option<MemoryKind>,
    ) -> Result<Vec<MemoryHit>> {
        if !self.is_available() || query.is_empty() {
            return Ok(Vec::new());
        }

        let vector = Self::vector_literal(query);
        let result = if let Some(kind) = kind {
            sqlx::query(
                r#"
                SELECT id, content, metadata, type, created_at,
                       1 - (embedding <=> $2::vector) AS similarity
                FROM chat_vectors
                WHERE user_id = $1
                  AND type = $5
                  AND embedding IS NOT NULL
                  AND (1 - (embedding <=> $2::vector)) >= $3
                ORDER BY embedding <=> $2::vector, id
                LIMIT $4
                "#,
            )
            .bind(user_id)
            .bind(&vector)
            .bind(threshold)
            .bind(limit as i64)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT id, content, metadata, type, created_at,
                       1 - (embedding <=> $2::vector) AS similarity
                FROM chat_vectors
                WHERE user_id = $1
                  AND embedding IS NOT NULL
                  AND (1 - (embedding <=> $2::vector)) >= $3
                ORDER BY embedding <=> $2::vector, id
                LIMIT $4
                "#,
            )
            .bind(user_id)
            .bind(&vector)
            .bind(threshold)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        };

        match result {
            Ok(rows) => Ok(rows.iter().map(Self::row_to_hit).collect()),
            Err(e) => {
                warn!("Vector search failed, returning empty: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn conversation_history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }

        let result = sqlx::query(
            r#"
            SELECT id, content, metadata, type, created_at, 0.0::float8 AS similarity
            FROM chat_vectors
            WHERE user_id = $1 AND conversation_id = $2 AND type = 'conversation'
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(rows) => {
                let mut hits: Vec<MemoryHit> = rows.iter().map(Self::row_to_hit).collect();
                hits.reverse(); // chronological
                Ok(hits)
            }
            Err(e) => {
                warn!("Conversation history fetch failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        if !self.is_available() {
            return Ok(None);
        }

        let result = sqlx::query(
            r#"
            SELECT preferences, interests, conversation_count, total_messages,
                   first_seen, last_active
            FROM user_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.map(|row| Self::row_to_profile(user_id, &row))),
            Err(e) => {
                warn!("Profile fetch failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn update_user_profile(&self, user_id: &str, delta: &ProfileDelta) -> Result<()> {
        if is_guest_id(user_id) {
            debug!("Skipping profile write for guest principal");
            return Ok(());
        }
        if !self.is_available() || (delta.is_empty() && !delta.increment_messages) {
            return Ok(());
        }

        // Atomic read-modify-write on the single profile row
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT preferences, interests, conversation_count, total_messages,
                   first_seen, last_active
            FROM user_profiles
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut profile = row
            .map(|row| Self::row_to_profile(user_id, &row))
            .unwrap_or_else(|| UserProfile::empty(user_id));
        profile.apply_delta(delta);

        sqlx::query(
            r#"
            INSERT INTO user_profiles
                (user_id, preferences, interests, conversation_count, total_messages,
                 first_seen, last_active)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (user_id) DO UPDATE SET
                preferences = EXCLUDED.preferences,
                interests = EXCLUDED.interests,
                total_messages = EXCLUDED.total_messages,
                last_active = now()
            "#,
        )
        .bind(user_id)
        .bind(serde_json::Value::Object(profile.preferences.clone()))
        .bind(serde_json::json!(profile.interests))
        .bind(profile.conversation_count)
        .bind(profile.total_messages)
        .bind(profile.first_seen)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Updated profile for {}", user_id);
        Ok(())
    }

    async fn delete_user_data(&self, user_id: &str) -> Result<u64> {
        if !self.is_available() {
            return Ok(0);
        }

        let vectors = sqlx::query("DELETE FROM chat_vectors WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        info!(
            "Deleted {} memory records for {}",
            vectors.rows_affected(),
            user_id
        );
        Ok(vectors.rows_affected())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<u64> {
        if !self.is_available() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM chat_vectors WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_format() {
        assert_eq!(PgVectorStore::vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
        assert_eq!(PgVectorStore::vector_literal(&[]), "[]");
    }
}
