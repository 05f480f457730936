// src/predictions/mod.rs

//! Shared prediction cache: one web analysis serves every user asking about
//! the same match inside the freshness window.
//!
//! Bundles are keyed by `(sport, query_type, normalized match details)`.
//! Reads only ever see the newest active, non-expired bundle and bump its
//! view counter; expiry is a soft-delete sweep rather than a hard delete.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use crate::search::SourceRef;

/// Cache key tuple. `match_details` is normalized on construction
/// (lowercased, whitespace-collapsed) so phrasing differences collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredictionKey {
    pub sport: String,
    pub query_type: String,
    pub match_details: String,
}

impl PredictionKey {
    pub fn new(sport: &str, query_type: &str, match_details: &str) -> Self {
        Self {
            sport: sport.trim().to_lowercase(),
            query_type: query_type.trim().to_lowercase(),
            match_details: match_details
                .trim()
                .to_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Pre-analyzed evidence for one match, shared across users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionBundle {
    pub id: i64,
    pub sport: String,
    pub query_type: String,
    pub match_details: String,
    pub analysis: String,
    pub sources: Vec<SourceRef>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub view_count: i64,
    pub active: bool,
}

/// Shared prediction-cache capability
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Newest active non-expired bundle for the key; atomically increments
    /// its view counter on hit
    async fn get(&self, key: &PredictionKey) -> Result<Option<PredictionBundle>>;

    /// Existence check that does not touch the view counter
    async fn peek(&self, key: &PredictionKey) -> Result<bool>;

    /// Insert a fresh bundle. Older rows for the same key are not retired
    /// here; expiry filtering and the sweep handle them.
    async fn put(
        &self,
        key: &PredictionKey,
        analysis: &str,
        sources: &[SourceRef],
        ttl_hours: i64,
    ) -> Result<i64>;

    /// Most-viewed live bundles, optionally per sport
    async fn popular(&self, sport: Option<&str>, limit: usize) -> Result<Vec<PredictionBundle>>;

    /// Soft-delete expired bundles; returns how many were retired
    async fn sweep_expired(&self) -> Result<u64>;
}

/// Postgres-backed prediction store
pub struct PgPredictionStore {
    pool: PgPool,
}

#[derive(Debug, Serialize, Deserialize)]
struct BundlePayload {
    analysis: String,
    sources: Vec<SourceRef>,
}

impl PgPredictionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id BIGSERIAL PRIMARY KEY,
                sport VARCHAR(50) NOT NULL,
                query_type VARCHAR(50) NOT NULL,
                match_details TEXT NOT NULL,
                prediction_data JSONB NOT NULL,
                view_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                expires_at TIMESTAMPTZ NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_bundle(row: &sqlx::postgres::PgRow) -> PredictionBundle {
        let payload: serde_json::Value = row
            .try_get("prediction_data")
            .unwrap_or(serde_json::Value::Null);
        let parsed: BundlePayload = serde_json::from_value(payload).unwrap_or(BundlePayload {
            analysis: String::new(),
            sources: Vec::new(),
        });

        PredictionBundle {
            id: row.try_get("id").unwrap_or_default(),
            sport: row.try_get("sport").unwrap_or_default(),
            query_type: row.try_get("query_type").unwrap_or_default(),
            match_details: row.try_get("match_details").unwrap_or_default(),
            analysis: parsed.analysis,
            sources: parsed.sources,
            created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
            expires_at: row.try_get("expires_at").unwrap_or_else(|_| Utc::now()),
            view_count: row.try_get("view_count").unwrap_or(0),
            active: row.try_get("is_active").unwrap_or(false),
        }
    }
}

#[async_trait]
impl PredictionStore for PgPredictionStore {
    async fn get(&self, key: &PredictionKey) -> Result<Option<PredictionBundle>> {
        // Select-newest and view-count bump in one statement
        let result = sqlx::query(
            r#"
            UPDATE predictions
            SET view_count = view_count + 1
            WHERE id = (
                SELECT id FROM predictions
                WHERE sport = $1
                  AND query_type = $2
                  AND match_details = $3
                  AND expires_at > now()
                  AND is_active = TRUE
                ORDER BY created_at DESC, id DESC
                LIMIT 1
            )
            RETURNING id, sport, query_type, match_details, prediction_data,
                      view_count, created_at, expires_at, is_active
            "#,
        )
        .bind(&key.sport)
        .bind(&key.query_type)
        .bind(&key.match_details)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(row)) => {
                let bundle = Self::row_to_bundle(&row);
                debug!(
                    "Prediction cache hit #{} for '{}' (views: {})",
                    bundle.id, key.match_details, bundle.view_count
                );
                Ok(Some(bundle))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Prediction cache read failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn peek(&self, key: &PredictionKey) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM predictions
                WHERE sport = $1
                  AND query_type = $2
                  AND match_details = $3
                  AND expires_at > now()
                  AND is_active = TRUE
            ) AS present
            "#,
        )
        .bind(&key.sport)
        .bind(&key.query_type)
        .bind(&key.match_details)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("present"))
    }

    async fn put(
        &self,
        key: &PredictionKey,
        analysis: &str,
        sources: &[SourceRef],
        ttl_hours: i64,
    ) -> Result<i64> {
        let payload = BundlePayload {
            analysis: analysis.to_string(),
            sources: sources.to_vec(),
        };
        let expires_at = Utc::now() + Duration::hours(ttl_hours);

        let row = sqlx::query(
            r#"
            INSERT INTO predictions (sport, query_type, match_details, prediction_data, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&key.sport)
        .bind(&key.query_type)
        .bind(&key.match_details)
        .bind(serde_json::to_value(&payload)?)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        info!(
            "Cached prediction #{} for '{}' ({}h window)",
            id, key.match_details, ttl_hours
        );
        Ok(id)
    }

    async fn popular(&self, sport: Option<&str>, limit: usize) -> Result<Vec<PredictionBundle>> {
        let rows = if let Some(sport) = sport {
            sqlx::query(
                r#"
                SELECT id, sport, query_type, match_details, prediction_data,
                       view_count, created_at, expires_at, is_active
                FROM predictions
                WHERE sport = $1 AND is_active = TRUE AND expires_at > now()
                ORDER BY view_count DESC, id DESC
                LIMIT $2
                "#,
            )
            .bind(sport)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT id, sport, query_type, match_details, prediction_data,
                       view_count, created_at, expires_at, is_active
                FROM predictions
                WHERE is_active = TRUE AND expires_at > now()
                ORDER BY view_count DESC, id DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows.iter().map(Self::row_to_bundle).collect())
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE predictions SET is_active = FALSE WHERE expires_at < now() AND is_active = TRUE",
        )
        .execute(&self.pool)
        .await?;

        let retired = result.rows_affected();
        if retired > 0 {
            info!("Retired {} expired predictions", retired);
        }
        Ok(retired)
    }
}
