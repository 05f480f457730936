// src/error.rs
// Error types surfaced by the chat orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Plan;

/// Reason codes for admission denials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    FreeLimitExceeded,
    DailyLimitExceeded,
    LifetimeLimitExceeded,
    SearchSubquotaExceeded,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::FreeLimitExceeded => "free_limit_exceeded",
            DenialReason::DailyLimitExceeded => "daily_limit_exceeded",
            DenialReason::LifetimeLimitExceeded => "lifetime_limit_exceeded",
            DenialReason::SearchSubquotaExceeded => "search_subquota_exceeded",
        }
    }
}

/// A plan entry rendered into denial envelopes for upgrade hints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanHint {
    pub id: String,
    pub name: String,
    pub price: u32,
    pub limit_description: String,
}

impl From<&Plan> for PlanHint {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.clone(),
            name: plan.name.clone(),
            price: plan.price_inr,
            limit_description: plan.limit_description(),
        }
    }
}

/// Structured payload for a quota denial, enough for a client to render an
/// upgrade path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionDenial {
    pub error: DenialReason,
    pub message: String,
    pub tier: String,
    pub used: i64,
    pub limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<chrono::DateTime<chrono::Utc>>,
    pub upgrade_required: bool,
    pub plans: Vec<PlanHint>,
}

/// Orchestrator error type
///
/// Only two kinds are hard failures: quota denial and LLM failure. Everything
/// else is absorbed at the stage boundary and logged.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("message denied: {}", .0.message)]
    Denied(AdmissionDenial),
    #[error("LLM call failed: {0}")]
    LlmFailure(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_reason_codes() {
        assert_eq!(
            DenialReason::FreeLimitExceeded.as_str(),
            "free_limit_exceeded"
        );
        assert_eq!(
            DenialReason::DailyLimitExceeded.as_str(),
            "daily_limit_exceeded"
        );
    }

    #[test]
    fn test_denial_serializes_with_reason_code() {
        let denial = AdmissionDenial {
            error: DenialReason::FreeLimitExceeded,
            message: "out of free messages".to_string(),
            tier: "guest".to_string(),
            used: 3,
            limit: 3,
            reset_at: None,
            upgrade_required: true,
            plans: vec![],
        };
        let json = serde_json::to_value(&denial).unwrap();
        assert_eq!(json["error"], "free_limit_exceeded");
        assert_eq!(json["used"], 3);
        assert!(json.get("reset_at").is_none());
    }
}
