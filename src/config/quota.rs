// src/config/quota.rs
// Subscription plans and quota limits

use serde::{Deserialize, Serialize};

/// A subscription plan consulted at admission time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_inr: u32,
    /// Lifetime message cap; None = unlimited
    pub messages_total: Option<i64>,
    /// Daily message cap; None = unlimited
    pub messages_per_day: Option<i64>,
    pub features: Vec<String>,
}

impl Plan {
    fn new(
        id: &str,
        name: &str,
        price_inr: u32,
        messages_total: Option<i64>,
        messages_per_day: Option<i64>,
        features: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price_inr,
            messages_total,
            messages_per_day,
            features: features.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Human-readable limit summary for upgrade hints
    pub fn limit_description(&self) -> String {
        match (self.messages_total, self.messages_per_day) {
            (Some(total), _) => format!("{} messages total", total),
            (None, Some(daily)) => format!("{}/day", daily),
            (None, None) => "Unlimited".to_string(),
        }
    }
}

/// Quota configuration: plan table plus guest and web-search limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub enabled: bool,
    pub guest_message_limit: i64,
    pub web_search_limit_guest: i64,
    pub web_search_limit_free: i64,
    pub web_search_limit_paid: i64,
    pub plans: Vec<Plan>,
}

impl QuotaConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: super::helpers::env_bool("ENABLE_QUOTA_LIMITS", true),
            guest_message_limit: super::helpers::env_parsed("GUEST_MESSAGE_LIMIT", 3),
            web_search_limit_guest: super::helpers::env_parsed("WEB_SEARCH_LIMIT_GUEST", 5),
            web_search_limit_free: super::helpers::env_parsed("WEB_SEARCH_LIMIT_FREE", 10),
            web_search_limit_paid: super::helpers::env_parsed("WEB_SEARCH_LIMIT_PAID", 50),
            plans: Self::default_plans(),
        }
    }

    pub fn default_plans() -> Vec<Plan> {
        vec![
            Plan::new("guest", "Guest", 0, Some(3), None, &["basic_chat"]),
            Plan::new(
                "free",
                "Free (Registered)",
                0,
                Some(10),
                None,
                &["basic_chat", "memory"],
            ),
            Plan::new(
                "limited",
                "Limited Plan",
                399,
                None,
                Some(50),
                &["basic_chat", "memory", "web_search", "rag"],
            ),
            Plan::new(
                "unlimited",
                "Unlimited Plan",
                999,
                None,
                None,
                &["basic_chat", "memory", "web_search", "rag", "priority_support"],
            ),
        ]
    }

    pub fn plan(&self, tier: &str) -> &Plan {
        self.plans
            .iter()
            .find(|p| p.id == tier)
            .unwrap_or_else(|| &self.plans[1]) // unknown tiers fall back to free
    }

    /// Plans worth advertising in an upgrade hint (paid tiers)
    pub fn upgrade_plans(&self) -> Vec<Plan> {
        self.plans
            .iter()
            .filter(|p| p.price_inr > 0)
            .cloned()
            .collect()
    }

    pub fn web_search_limit(&self, tier: &str, is_guest: bool) -> i64 {
        if is_guest {
            self.web_search_limit_guest
        } else if matches!(tier, "limited" | "unlimited") {
            self.web_search_limit_paid
        } else {
            self.web_search_limit_free
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_table() {
        let config = QuotaConfig::from_env();

        let guest = config.plan("guest");
        assert_eq!(guest.messages_total, Some(3));
        assert_eq!(guest.messages_per_day, None);

        let free = config.plan("free");
        assert_eq!(free.messages_total, Some(10));

        let limited = config.plan("limited");
        assert_eq!(limited.messages_total, None);
        assert_eq!(limited.messages_per_day, Some(50));
        assert!(limited.features.contains(&"web_search".to_string()));

        let unlimited = config.plan("unlimited");
        assert_eq!(unlimited.messages_total, None);
        assert_eq!(unlimited.messages_per_day, None);
    }

    #[test]
    fn test_unknown_tier_falls_back_to_free() {
        let config = QuotaConfig::from_env();
        assert_eq!(config.plan("enterprise").id, "free");
    }

    #[test]
    fn test_web_search_limits_by_tier() {
        let config = QuotaConfig::from_env();
        assert_eq!(config.web_search_limit("free", true), 5); // guests ignore tier
        assert_eq!(config.web_search_limit("free", false), 10);
        assert_eq!(config.web_search_limit("limited", false), 50);
        assert_eq!(config.web_search_limit("unlimited", false), 50);
    }
}
