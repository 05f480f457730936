// src/quota/mod.rs

//! Identity classification and admission control.
//!
//! A principal is a guest fingerprint, a registered user, or a system
//! pseudo-user. Guests get a small lifetime message allowance keyed by
//! fingerprint; registered users get their plan's lifetime/daily limits with
//! a timed daily reset. Denied messages never move a counter. The
//! web-search sub-quota rides on 24-hour cache counters, and cached search
//! reads are free.

pub mod pg;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::cache::CacheLayer;
use crate::config::quota::QuotaConfig;
use crate::error::{AdmissionDenial, DenialReason, PlanHint};

pub use pg::PgQuotaStore;

const WS_COUNTER_PREFIX: &str = "wsc";

/// Anything authorized to send messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Guest { fingerprint: String },
    Registered { user_id: String },
}

impl Principal {
    /// Stable 32-char fingerprint of client ip + user agent, used to track
    /// guests across requests without storing either value directly
    pub fn fingerprint(ip: &str, user_agent: &str) -> String {
        let digest = Sha256::digest(format!("{}:{}", ip, user_agent).as_bytes());
        let mut fingerprint = format!("{:x}", digest);
        fingerprint.truncate(32);
        fingerprint
    }

    /// Classify the ingress identity. Empty/anonymous ids become guests
    /// derived from the request fingerprint.
    pub fn resolve(user_id: Option<&str>, ip: &str, user_agent: &str) -> Self {
        match user_id.map(str::trim) {
            Some(id) if !id.is_empty() && id != "anonymous-user" => {
                if let Some(fp) = id.strip_prefix("guest_").or_else(|| id.strip_prefix("guest-")) {
                    Principal::Guest {
                        fingerprint: fp.to_string(),
                    }
                } else {
                    Principal::Registered {
                        user_id: id.to_string(),
                    }
                }
            }
            _ => Principal::Guest {
                fingerprint: Self::fingerprint(ip, user_agent),
            },
        }
    }

    /// Canonical principal id used for storage and cache keys
    pub fn id(&self) -> String {
        match self {
            Principal::Guest { fingerprint } => format!("guest_{}", fingerprint),
            Principal::Registered { user_id } => user_id.clone(),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Principal::Guest { .. })
    }
}

/// Per-user quota counters
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    pub user_id: String,
    pub tier: String,
    pub messages_lifetime: i64,
    pub messages_today: i64,
    pub daily_reset_at: DateTime<Utc>,
}

/// Result of the atomic guest check-and-increment
#[derive(Debug, Clone, Copy)]
pub struct GuestAdmit {
    pub admitted: bool,
    /// Count after increment when admitted; current count when denied
    pub count: i64,
}

/// Quota persistence capability
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically admit-and-count a guest message: increments only when the
    /// current count is below `limit`.
    async fn try_admit_guest(&self, fingerprint: &str, ip: &str, limit: i64) -> Result<GuestAdmit>;

    async fn guest_count(&self, fingerprint: &str) -> Result<i64>;

    async fn load_ledger(&self, user_id: &str) -> Result<Option<QuotaLedger>>;

    /// First-contact ledger row (tier defaults to free)
    async fn create_ledger(&self, user_id: &str, tier: &str) -> Result<QuotaLedger>;

    async fn reset_daily(&self, user_id: &str, reset_at: DateTime<Utc>) -> Result<()>;

    /// Bump both counters; returns (messages_lifetime, messages_today)
    async fn increment_messages(&self, user_id: &str) -> Result<(i64, i64)>;

    /// Tier change on upgrade/downgrade. Counters persist across changes.
    async fn set_tier(&self, user_id: &str, tier: &str) -> Result<()>;
}

/// Admission decision for one message
#[derive(Debug, Clone)]
pub enum Admission {
    Admitted {
        tier: String,
        messages_lifetime: i64,
        messages_today: i64,
    },
    Denied(AdmissionDenial),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Admission control over a quota store + cache counters
pub struct QuotaManager {
    store: Arc<dyn QuotaStore>,
    cache: Arc<CacheLayer>,
    config: QuotaConfig,
    ws_counter_ttl_secs: i64,
}

impl QuotaManager {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        cache: Arc<CacheLayer>,
        config: QuotaConfig,
        ws_counter_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            ws_counter_ttl_secs,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Evaluate the message against the principal's limits. Counters move
    /// only on admission.
    pub async fn admit(&self, principal: &Principal, ip: &str) -> Result<Admission> {
        if !self.config.enabled {
            return Ok(Admission::Admitted {
                tier: self.tier(principal).await,
                messages_lifetime: 0,
                messages_today: 0,
            });
        }

        match principal {
            Principal::Guest { fingerprint } => self.admit_guest(fingerprint, ip).await,
            Principal::Registered { user_id } => self.admit_registered(user_id).await,
        }
    }

    async fn admit_guest(&self, fingerprint: &str, ip: &str) -> Result<Admission> {
        let limit = self.config.guest_message_limit;
        let outcome = self.store.try_admit_guest(fingerprint, ip, limit).await?;

        if outcome.admitted {
            debug!("Guest {} admitted ({}/{})", fingerprint, outcome.count, limit);
            return Ok(Admission::Admitted {
                tier: "guest".to_string(),
                messages_lifetime: outcome.count,
                messages_today: outcome.count,
            });
        }

        Ok(Admission::Denied(AdmissionDenial {
            error: DenialReason::FreeLimitExceeded,
            message: format!(
                "You've used your {} free messages. Please sign up to continue!",
                limit
            ),
            tier: "guest".to_string(),
            used: outcome.count,
            limit,
            reset_at: None,
            upgrade_required: true,
            plans: self.plan_hints(),
        }))
    }

    async fn admit_registered(&self, user_id: &str) -> Result<Admission> {
        let ledger = match self.store.load_ledger(user_id).await? {
            Some(ledger) => ledger,
            None => self.store.create_ledger(user_id, "free").await?,
        };

        // Timed reset: first admit after the boundary zeroes the daily count
        let mut messages_today = ledger.messages_today;
        let mut daily_reset_at = ledger.daily_reset_at;
        let now = Utc::now();
        if now >= daily_reset_at {
            messages_today = 0;
            daily_reset_at = now + Duration::hours(24);
            self.store.reset_daily(user_id, daily_reset_at).await?;
        }

        let plan = self.config.plan(&ledger.tier);

        if let Some(total) = plan.messages_total {
            if ledger.messages_lifetime >= total {
                return Ok(Admission::Denied(AdmissionDenial {
                    error: DenialReason::LifetimeLimitExceeded,
                    message: format!("You've used all {} free messages. Upgrade to continue!", total),
                    tier: ledger.tier.clone(),
                    used: ledger.messages_lifetime,
                    limit: total,
                    reset_at: None,
                    upgrade_required: true,
                    plans: self.plan_hints(),
                }));
            }
        }

        if let Some(daily) = plan.messages_per_day {
            if messages_today >= daily {
                return Ok(Admission::Denied(AdmissionDenial {
                    error: DenialReason::DailyLimitExceeded,
                    message: format!(
                        "You've reached your daily limit of {} messages. Upgrade for more!",
                        daily
                    ),
                    tier: ledger.tier.clone(),
                    used: messages_today,
                    limit: daily,
                    reset_at: Some(daily_reset_at),
                    upgrade_required: true,
                    plans: self.plan_hints(),
                }));
            }
        }

        let (messages_lifetime, messages_today) = self.store.increment_messages(user_id).await?;
        Ok(Admission::Admitted {
            tier: ledger.tier,
            messages_lifetime,
            messages_today,
        })
    }

    /// Current tier without touching counters
    pub async fn tier(&self, principal: &Principal) -> String {
        match principal {
            Principal::Guest { .. } => "guest".to_string(),
            Principal::Registered { user_id } => self
                .store
                .load_ledger(user_id)
                .await
                .ok()
                .flatten()
                .map(|l| l.tier)
                .unwrap_or_else(|| "free".to_string()),
        }
    }

    pub fn is_paid_tier(tier: &str) -> bool {
        matches!(tier, "limited" | "unlimited")
    }

    // Web-search sub-quota (24h TTL counters in the cache layer)

    pub async fn web_search_count(&self, principal: &Principal) -> i64 {
        self.cache
            .get_counter(WS_COUNTER_PREFIX, &principal.id())
            .await
    }

    pub async fn increment_web_search(&self, principal: &Principal) -> i64 {
        self.cache
            .increment_counter(WS_COUNTER_PREFIX, &principal.id(), self.ws_counter_ttl_secs)
            .await
    }

    pub fn web_search_limit(&self, tier: &str, is_guest: bool) -> i64 {
        self.config.web_search_limit(tier, is_guest)
    }

    fn plan_hints(&self) -> Vec<PlanHint> {
        self.config.plans.iter().map(PlanHint::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_32_chars() {
        let a = Principal::fingerprint("1.2.3.4", "Mozilla/5.0");
        let b = Principal::fingerprint("1.2.3.4", "Mozilla/5.0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let c = Principal::fingerprint("1.2.3.5", "Mozilla/5.0");
        assert_ne!(a, c);
    }

    #[test]
    fn test_resolve_empty_id_becomes_guest() {
        let p = Principal::resolve(None, "1.2.3.4", "ua");
        assert!(p.is_guest());
        assert!(p.id().starts_with("guest_"));

        let p = Principal::resolve(Some("  "), "1.2.3.4", "ua");
        assert!(p.is_guest());

        let p = Principal::resolve(Some("anonymous-user"), "1.2.3.4", "ua");
        assert!(p.is_guest());
    }

    #[test]
    fn test_resolve_existing_guest_id_keeps_fingerprint() {
        let p = Principal::resolve(Some("guest_abc123"), "9.9.9.9", "other-ua");
        assert_eq!(
            p,
            Principal::Guest {
                fingerprint: "abc123".to_string()
            }
        );
        assert_eq!(p.id(), "guest_abc123");
    }

    #[test]
    fn test_resolve_registered() {
        let p = Principal::resolve(Some("user-42"), "1.2.3.4", "ua");
        assert!(!p.is_guest());
        assert_eq!(p.id(), "user-42");
    }

    #[test]
    fn test_paid_tier_detection() {
        assert!(QuotaManager::is_paid_tier("limited"));
        assert!(QuotaManager::is_paid_tier("unlimited"));
        assert!(!QuotaManager::is_paid_tier("free"));
        assert!(!QuotaManager::is_paid_tier("guest"));
    }
}
