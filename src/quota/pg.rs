// src/quota/pg.rs
// Postgres-backed quota store

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{GuestAdmit, QuotaLedger, QuotaStore};

pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_ledgers (
                user_id VARCHAR(255) PRIMARY KEY,
                tier VARCHAR(50) NOT NULL DEFAULT 'free',
                messages_lifetime BIGINT NOT NULL DEFAULT 0,
                messages_today BIGINT NOT NULL DEFAULT 0,
                daily_reset_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guest_usage (
                fingerprint VARCHAR(64) PRIMARY KEY,
                ip_address VARCHAR(45) NOT NULL,
                message_count BIGINT NOT NULL DEFAULT 0,
                first_message_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_message_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_ledger(row: &sqlx::postgres::PgRow) -> QuotaLedger {
        QuotaLedger {
            user_id: row.try_get("user_id").unwrap_or_default(),
            tier: row.try_get("tier").unwrap_or_else(|_| "free".to_string()),
            messages_lifetime: row.try_get("messages_lifetime").unwrap_or(0),
            messages_today: row.try_get("messages_today").unwrap_or(0),
            daily_reset_at: row.try_get("daily_reset_at").unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn try_admit_guest(&self, fingerprint: &str, ip: &str, limit: i64) -> Result<GuestAdmit> {
        // Single statement: the conditional upsert both checks and counts,
        // so concurrent requests can't slip past the limit
        let row = sqlx::query(
            r#"
            INSERT INTO guest_usage (fingerprint, ip_address, message_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (fingerprint) DO UPDATE
            SET message_count = guest_usage.message_count + 1,
                last_message_at = now()
            WHERE guest_usage.message_count < $3
            RETURNING message_count
            "#,
        )
        .bind(fingerprint)
        .bind(ip)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(GuestAdmit {
                admitted: true,
                count: row.get("message_count"),
            }),
            None => {
                let count = self.guest_count(fingerprint).await?;
                debug!("Guest {} denied at count {}", fingerprint, count);
                Ok(GuestAdmit {
                    admitted: false,
                    count,
                })
            }
        }
    }

    async fn guest_count(&self, fingerprint: &str) -> Result<i64> {
        let row = sqlx::query("SELECT message_count FROM guest_usage WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("message_count")).unwrap_or(0))
    }

    async fn load_ledger(&self, user_id: &str) -> Result<Option<QuotaLedger>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, tier, messages_lifetime, messages_today, daily_reset_at
            FROM quota_ledgers
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Self::row_to_ledger(&r)))
    }

    async fn create_ledger(&self, user_id: &str, tier: &str) -> Result<QuotaLedger> {
        let row = sqlx::query(
            r#"
            INSERT INTO quota_ledgers (user_id, tier, daily_reset_at)
            VALUES ($1, $2, now() + interval '24 hours')
            ON CONFLICT (user_id) DO UPDATE SET updated_at = now()
            RETURNING user_id, tier, messages_lifetime, messages_today, daily_reset_at
            "#,
        )
        .bind(user_id)
        .bind(tier)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::row_to_ledger(&row))
    }

    async fn reset_daily(&self, user_id: &str, reset_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE quota_ledgers
            SET messages_today = 0, daily_reset_at = $2, updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(reset_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_messages(&self, user_id: &str) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            UPDATE quota_ledgers
            SET messages_lifetime = messages_lifetime + 1,
                messages_today = messages_today + 1,
                updated_at = now()
            WHERE user_id = $1
            RETURNING messages_lifetime, messages_today
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("messages_lifetime"), row.get("messages_today")))
    }

    async fn set_tier(&self, user_id: &str, tier: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quota_ledgers (user_id, tier, daily_reset_at)
            VALUES ($1, $2, now() + interval '24 hours')
            ON CONFLICT (user_id) DO UPDATE SET tier = EXCLUDED.tier, updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(tier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
