//! Runs against a real Redis. Set REDIS_URL (default redis://127.0.0.1:6379) and run
//! with `--ignored`.

use rental_portal::store::{RedisTokenStore, StoreError, TokenStore};
use std::time::Duration;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// --- Test Context and Setup ---

async fn redis_store() -> RedisTokenStore {
    dotenv::dotenv().ok();

    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let store = RedisTokenStore::new(&url, CONNECT_TIMEOUT).expect("REDIS_URL must be valid");
    store
        .ping()
        .await
        .expect("Failed to connect to Redis for integration tests.");
    store
}

/// A key no other test run can collide with.
fn unique(prefix: &str) -> String {
    format!("it:{prefix}:{}", Uuid::new_v4())
}

// --- Lazy connection ---

#[tokio::test]
async fn test_unreachable_redis_is_reported_per_call() {
    // Nothing listens on port 1; construction must still succeed.
    let store = RedisTokenStore::new("redis://127.0.0.1:1", Duration::from_millis(200)).unwrap();

    assert!(matches!(
        store.is_blacklisted("any-token").await,
        Err(StoreError::Unavailable(_))
    ));
    // Within the reconnect delay the next call fails without dialing again.
    assert!(matches!(
        store.increment("rl:api:any", Duration::from_secs(60)).await,
        Err(StoreError::Unavailable(_))
    ));
}

#[test]
fn test_malformed_url_is_rejected() {
    assert!(RedisTokenStore::new("not a url", CONNECT_TIMEOUT).is_err());
}

// --- Counters ---

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn test_first_hit_sets_window_expiry() {
    let store = redis_store().await;
    let key = unique("rl");
    let window = Duration::from_secs(60);

    let first = store.increment(&key, window).await.unwrap();
    assert_eq!(first.count, 1);
    assert!(first.reset_after <= window);
    assert!(first.reset_after > Duration::ZERO);

    let second = store.increment(&key, window).await.unwrap();
    assert_eq!(second.count, 2);
    assert!(second.reset_after <= window);

    store.reset(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn test_decrement_deletes_key_at_zero() {
    let store = redis_store().await;
    let key = unique("rl");
    let window = Duration::from_secs(60);

    store.increment(&key, window).await.unwrap();
    store.decrement(&key).await.unwrap();

    // The key is gone, so the next hit starts a fresh window.
    let hit = store.increment(&key, window).await.unwrap();
    assert_eq!(hit.count, 1);
    assert!(hit.reset_after > Duration::ZERO);

    store.reset(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn test_reset_clears_counter() {
    let store = redis_store().await;
    let key = unique("rl");
    let window = Duration::from_secs(60);

    store.increment(&key, window).await.unwrap();
    store.increment(&key, window).await.unwrap();
    store.reset(&key).await.unwrap();

    assert_eq!(store.increment(&key, window).await.unwrap().count, 1);
    store.reset(&key).await.unwrap();
}

// --- Blacklist ---

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn test_blacklisted_token_is_reported() {
    let store = redis_store().await;
    let token = unique("token");

    assert!(!store.is_blacklisted(&token).await.unwrap());
    store.blacklist(&token, Duration::from_secs(60)).await.unwrap();
    assert!(store.is_blacklisted(&token).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn test_zero_ttl_blacklist_is_a_no_op() {
    let store = redis_store().await;
    let token = unique("token");

    store.blacklist(&token, Duration::ZERO).await.unwrap();
    assert!(!store.is_blacklisted(&token).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn test_claim_succeeds_once() {
    let store = redis_store().await;
    let token = unique("refresh");

    assert!(store.claim(&token, Duration::from_secs(60)).await.unwrap());
    assert!(!store.claim(&token, Duration::from_secs(60)).await.unwrap());
    assert!(store.is_blacklisted(&token).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn test_concurrent_claims_have_one_winner() {
    let store = redis_store().await;
    let token = unique("refresh");
    let ttl = Duration::from_secs(60);

    let (a, b, c) = tokio::join!(
        store.claim(&token, ttl),
        store.claim(&token, ttl),
        store.claim(&token, ttl),
    );
    let winners = [a.unwrap(), b.unwrap(), c.unwrap()]
        .into_iter()
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}
