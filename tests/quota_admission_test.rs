// tests/quota_admission_test.rs
// Admission control: guest limits, plan limits, timed resets, and the
// web-search sub-quota

mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use samvad::cache::CacheLayer;
use samvad::error::DenialReason;
use samvad::quota::{Admission, Principal, QuotaLedger, QuotaManager, QuotaStore};
use samvad::testing::InMemoryQuotaStore;

fn manager(store: Arc<InMemoryQuotaStore>) -> QuotaManager {
    QuotaManager::new(
        store,
        Arc::new(CacheLayer::in_process()),
        common::quota_config(),
        86_400,
    )
}

fn guest(fingerprint: &str) -> Principal {
    Principal::Guest {
        fingerprint: fingerprint.to_string(),
    }
}

fn registered(user_id: &str) -> Principal {
    Principal::Registered {
        user_id: user_id.to_string(),
    }
}

#[tokio::test]
async fn test_guest_allowed_up_to_limit_then_denied() {
    let store = Arc::new(InMemoryQuotaStore::new());
    let quota = manager(store.clone());
    let principal = guest("fp-001");

    println!("[1] First three messages admitted");
    for expected in 1..=3 {
        let admission = quota.admit(&principal, "1.2.3.4").await.unwrap();
        match admission {
            Admission::Admitted {
                messages_lifetime, ..
            } => assert_eq!(messages_lifetime, expected),
            Admission::Denied(_) => panic!("message {} should be admitted", expected),
        }
    }

    println!("[2] Fourth message denied with structured payload");
    let admission = quota.admit(&principal, "1.2.3.4").await.unwrap();
    match admission {
        Admission::Denied(denial) => {
            assert_eq!(denial.error, DenialReason::FreeLimitExceeded);
            assert_eq!(denial.limit, 3);
            assert_eq!(denial.used, 3);
            assert!(denial.upgrade_required);
            assert!(!denial.plans.is_empty(), "denial must carry upgrade plans");
        }
        Admission::Admitted { .. } => panic!("fourth guest message must be denied"),
    }

    println!("[3] Denial leaves the counter unchanged");
    assert_eq!(store.guest_count("fp-001").await.unwrap(), 3);
}

#[tokio::test]
async fn test_denied_messages_never_move_counters() {
    let store = Arc::new(InMemoryQuotaStore::new());
    let quota = manager(store.clone());
    let principal = registered("user-lifetime");

    // Free tier: 10 lifetime messages
    for _ in 0..10 {
        assert!(quota.admit(&principal, "ip").await.unwrap().is_admitted());
    }

    let before = store.ledger("user-lifetime").unwrap();
    for _ in 0..5 {
        let admission = quota.admit(&principal, "ip").await.unwrap();
        match admission {
            Admission::Denied(denial) => {
                assert_eq!(denial.error, DenialReason::LifetimeLimitExceeded);
                assert_eq!(denial.used, 10);
                assert_eq!(denial.limit, 10);
            }
            Admission::Admitted { .. } => panic!("over-limit message admitted"),
        }
    }
    let after = store.ledger("user-lifetime").unwrap();

    assert_eq!(before.messages_lifetime, after.messages_lifetime);
    assert_eq!(before.messages_today, after.messages_today);
}

#[tokio::test]
async fn test_daily_limit_and_timed_reset() {
    let store = Arc::new(InMemoryQuotaStore::new());
    let quota = manager(store.clone());
    let principal = registered("user-daily");

    // Paid tier at the daily boundary, reset due in the future
    store.put_ledger(QuotaLedger {
        user_id: "user-daily".to_string(),
        tier: "limited".to_string(),
        messages_lifetime: 500,
        messages_today: 50,
        daily_reset_at: Utc::now() + Duration::hours(3),
    });

    println!("[1] At the daily cap: denied with reset time");
    match quota.admit(&principal, "ip").await.unwrap() {
        Admission::Denied(denial) => {
            assert_eq!(denial.error, DenialReason::DailyLimitExceeded);
            assert_eq!(denial.limit, 50);
            assert!(denial.reset_at.is_some());
        }
        Admission::Admitted { .. } => panic!("should deny at daily cap"),
    }

    println!("[2] After the reset boundary the counter restarts");
    store.put_ledger(QuotaLedger {
        user_id: "user-daily".to_string(),
        tier: "limited".to_string(),
        messages_lifetime: 500,
        messages_today: 50,
        daily_reset_at: Utc::now() - Duration::minutes(1),
    });

    match quota.admit(&principal, "ip").await.unwrap() {
        Admission::Admitted {
            messages_today,
            messages_lifetime,
            ..
        } => {
            assert_eq!(messages_today, 1, "daily counter must restart at reset");
            assert_eq!(messages_lifetime, 501, "lifetime counter keeps counting");
        }
        Admission::Denied(_) => panic!("should admit after reset"),
    }

    let ledger = store.ledger("user-daily").unwrap();
    assert!(ledger.daily_reset_at > Utc::now() + Duration::hours(23));
}

#[tokio::test]
async fn test_unlimited_tier_never_denied() {
    let store = Arc::new(InMemoryQuotaStore::new());
    let quota = manager(store.clone());
    let principal = registered("user-unlimited");

    store.put_ledger(QuotaLedger {
        user_id: "user-unlimited".to_string(),
        tier: "unlimited".to_string(),
        messages_lifetime: 100_000,
        messages_today: 5_000,
        daily_reset_at: Utc::now() + Duration::hours(12),
    });

    for _ in 0..25 {
        assert!(quota.admit(&principal, "ip").await.unwrap().is_admitted());
    }
}

#[tokio::test]
async fn test_lifetime_counters_persist_across_tier_upgrade() {
    let store = Arc::new(InMemoryQuotaStore::new());
    let quota = manager(store.clone());
    let principal = registered("user-upgrade");

    for _ in 0..10 {
        assert!(quota.admit(&principal, "ip").await.unwrap().is_admitted());
    }
    assert!(!quota.admit(&principal, "ip").await.unwrap().is_admitted());

    // Upgrade: tier changes, counters do not
    store.set_tier("user-upgrade", "limited").await.unwrap();
    match quota.admit(&principal, "ip").await.unwrap() {
        Admission::Admitted {
            messages_lifetime, ..
        } => assert_eq!(messages_lifetime, 11),
        Admission::Denied(_) => panic!("limited tier has no lifetime cap"),
    }
}

#[tokio::test]
async fn test_web_search_subquota_counters() {
    let store = Arc::new(InMemoryQuotaStore::new());
    let quota = manager(store);
    let principal = registered("user-ws");

    assert_eq!(quota.web_search_count(&principal).await, 0);
    assert_eq!(quota.increment_web_search(&principal).await, 1);
    assert_eq!(quota.increment_web_search(&principal).await, 2);
    assert_eq!(quota.web_search_count(&principal).await, 2);

    // Independent per principal
    let other = registered("user-other");
    assert_eq!(quota.web_search_count(&other).await, 0);

    // Tier-based limits
    assert_eq!(quota.web_search_limit("free", true), 5);
    assert_eq!(quota.web_search_limit("free", false), 10);
    assert_eq!(quota.web_search_limit("limited", false), 50);
}
