// tests/prediction_flow_test.rs
// The shared prediction cache and the web-evidence pipeline: one fetch
// serves many users, sub-quota exhaustion degrades politely, expiry hides
// bundles

mod common;

use common::{build_harness, build_harness_with, client, request};
use samvad::predictions::{PredictionKey, PredictionStore};
use samvad::quota::Principal;
use samvad::search::SourceRef;
use samvad::testing::{search_hit, HashEmbeddings, InMemoryPredictionStore};
use std::sync::Arc;

fn sports_pages() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "https://news.example/ind-aus-preview",
            "India and Australia meet tomorrow. Pitch favors spin. Probable XI for India includes the usual top order.",
        ),
        (
            "https://stats.example/h2h",
            "Head to head: India lead 12-9 in the last 21 matches at this venue.",
        ),
    ]
}

fn sports_results() -> Vec<samvad::search::SearchHit> {
    vec![
        search_hit(
            "IND vs AUS preview",
            "https://news.example/ind-aus-preview",
            "Match preview and probable XI",
        ),
        search_hit(
            "IND vs AUS head to head",
            "https://stats.example/h2h",
            "Historical record",
        ),
    ]
}

#[tokio::test]
async fn test_s3_one_fetch_serves_many_users() {
    println!("\n=== S3: shared prediction cache ===\n");
    let pages = sports_pages();
    let harness = build_harness_with(sports_results(), &pages, Arc::new(HashEmbeddings));

    println!("[1] First user triggers search + scrape + cache write");
    let first = harness
        .chat
        .handle_message(
            request(Some("user-b"), None, "India vs Australia prediction"),
            &client(),
        )
        .await
        .unwrap();
    assert_eq!(harness.search_backend.call_count(), 1);
    assert!(!first.sources.is_empty(), "fresh analysis should carry sources");
    assert_eq!(harness.predictions.bundle_count(), 1);

    println!("[2] Second user hits the bundle; no new provider call");
    let second = harness
        .chat
        .handle_message(
            request(Some("user-c"), None, "India vs Australia prediction"),
            &client(),
        )
        .await
        .unwrap();
    assert_eq!(
        harness.search_backend.call_count(),
        1,
        "exactly one provider call across both turns"
    );
    assert!(!second.sources.is_empty());
    assert_eq!(harness.predictions.view_count(1), Some(1));

    println!("[3] Only the fetching user consumed web-search quota");
    let b = Principal::Registered {
        user_id: "user-b".to_string(),
    };
    let c = Principal::Registered {
        user_id: "user-c".to_string(),
    };
    assert_eq!(harness.quota.web_search_count(&b).await, 1);
    assert_eq!(harness.quota.web_search_count(&c).await, 0);
}

#[tokio::test]
async fn test_s4_exhausted_subquota_gets_friendly_fallback() {
    println!("\n=== S4: freshness fallback ===\n");
    let harness = build_harness_with(sports_results(), &[], Arc::new(HashEmbeddings));

    // Paid user with the web sub-quota fully spent
    harness
        .quota_store
        .put_ledger(samvad::quota::QuotaLedger {
            user_id: "user-s4".to_string(),
            tier: "limited".to_string(),
            messages_lifetime: 10,
            messages_today: 1,
            daily_reset_at: chrono::Utc::now() + chrono::Duration::hours(12),
        });
    let principal = Principal::Registered {
        user_id: "user-s4".to_string(),
    };
    for _ in 0..50 {
        harness.quota.increment_web_search(&principal).await;
    }

    let response = harness
        .chat
        .handle_message(
            request(Some("user-s4"), None, "Latest news today"),
            &client(),
        )
        .await
        .expect("the message itself is admitted");

    println!("[1] Friendly limit message, no provider call, no LLM call");
    assert!(response.response.contains("limit"));
    assert!(response.sources.is_empty());
    assert_eq!(response.tokens_used, 0);
    assert_eq!(harness.search_backend.call_count(), 0);

    println!("[2] The message still counted against the message quota");
    let ledger = harness.quota_store.ledger("user-s4").unwrap();
    assert_eq!(ledger.messages_lifetime, 11);
    assert_eq!(ledger.messages_today, 2);
}

#[tokio::test]
async fn test_expired_bundles_are_invisible() {
    println!("\n=== Prediction expiry ===\n");
    let store = InMemoryPredictionStore::new();
    let key = PredictionKey::new("cricket", "prediction", "india vs australia");
    let sources = vec![SourceRef {
        number: 1,
        title: "Preview".to_string(),
        url: "https://news.example/p".to_string(),
        source: "news.example".to_string(),
        fetched_at: chrono::Utc::now().to_rfc3339(),
    }];

    let id = store.put(&key, "analysis text", &sources, 6).await.unwrap();
    assert!(store.get(&key).await.unwrap().is_some());

    store.expire(id);
    assert!(
        store.get(&key).await.unwrap().is_none(),
        "expired bundles must read as absent"
    );

    let retired = store.sweep_expired().await.unwrap();
    assert_eq!(retired, 1);
    assert!(store.peek(&key).await.unwrap() == false);
}

#[tokio::test]
async fn test_newest_active_bundle_wins() {
    let store = InMemoryPredictionStore::new();
    let key = PredictionKey::new("cricket", "prediction", "ind vs aus");

    store.put(&key, "older analysis", &[], 6).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.put(&key, "newer analysis", &[], 6).await.unwrap();

    let bundle = store.get(&key).await.unwrap().unwrap();
    assert_eq!(bundle.analysis, "newer analysis");
}

#[tokio::test]
async fn test_prediction_key_is_shared_across_phrasings() {
    println!("\n=== Key normalization joins phrasings ===\n");
    let pages = sports_pages();
    let harness = build_harness_with(sports_results(), &pages, Arc::new(HashEmbeddings));

    harness
        .chat
        .handle_message(
            request(Some("user-p1"), None, "India vs Australia prediction"),
            &client(),
        )
        .await
        .unwrap();
    harness
        .chat
        .handle_message(
            request(Some("user-p2"), None, "prediction for INDIA  vs  AUSTRALIA today"),
            &client(),
        )
        .await
        .unwrap();

    assert_eq!(
        harness.search_backend.call_count(),
        1,
        "different phrasings of the same match share one bundle"
    );
    assert_eq!(harness.predictions.bundle_count(), 1);
}

#[tokio::test]
async fn test_generic_fresh_query_uses_search_cache_not_predictions() {
    let results = vec![search_hit(
        "Top headlines",
        "https://daily.example/top",
        "Five things happened today",
    )];
    let harness = build_harness_with(results, &[], Arc::new(HashEmbeddings));

    harness
        .chat
        .handle_message(request(Some("user-n1"), None, "Latest news today"), &client())
        .await
        .unwrap();
    assert_eq!(harness.search_backend.call_count(), 1);
    assert_eq!(harness.predictions.bundle_count(), 0);

    // A second user asking the same thing rides the search cache
    harness
        .chat
        .handle_message(request(Some("user-n2"), None, "Latest news today"), &client())
        .await
        .unwrap();
    assert_eq!(harness.search_backend.call_count(), 1);
}

#[tokio::test]
async fn test_sports_turn_skips_response_cache() {
    let pages = sports_pages();
    let harness = build_harness_with(sports_results(), &pages, Arc::new(HashEmbeddings));

    let message = "India vs Australia prediction";
    harness
        .chat
        .handle_message(request(Some("user-sc"), None, message), &client())
        .await
        .unwrap();
    harness
        .chat
        .handle_message(request(Some("user-sc"), None, message), &client())
        .await
        .unwrap();

    // Fresh-data turns are never served from the response cache; both turns
    // hit the LLM (the second with bundle evidence)
    assert_eq!(harness.llm.call_count(), 2);
}

#[tokio::test]
async fn test_no_results_degrades_to_memory_directive() {
    println!("\n=== Empty provider degrades silently ===\n");
    let harness = build_harness(); // no search results configured

    let response = harness
        .chat
        .handle_message(
            request(Some("user-empty"), None, "Latest news today"),
            &client(),
        )
        .await
        .unwrap();

    assert!(!response.response.is_empty());
    assert!(response.sources.is_empty());
    let system = harness.llm.last_system_prompt();
    assert!(
        system.contains("Do NOT fabricate"),
        "prompt should instruct the model not to invent fresh facts"
    );
}
