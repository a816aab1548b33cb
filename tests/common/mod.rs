#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{Method, Request, Uri, header, request::Parts};
use chrono::Utc;
use rental_portal::{
    AppConfig, AppState,
    auth::{Claims, TokenKind, encode_token, hash_password},
    models::{NewUser, Role, User},
    repository::{RepoResult, Repository},
    store::{Hit, MemoryTokenStore, StoreError, StoreResult, TokenStore, TokenStoreState},
};
use std::{
    sync::{
        Arc, LazyLock, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test-secret-value-that-is-long-enough-1234";
pub const TEST_PASSWORD: &str = "correct-horse-battery";

// Hashing is deliberately slow, so fixtures share one hash of `TEST_PASSWORD`.
static TEST_PASSWORD_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password(TEST_PASSWORD).unwrap());

// --- Mock Repository ---

/// In-memory user store.
#[derive(Default)]
pub struct MockRepository {
    users: Mutex<Vec<User>>,
}

impl MockRepository {
    pub fn with_users(users: Vec<User>) -> Self {
        Self {
            users: Mutex::new(users),
        }
    }

    pub fn remove(&self, id: Uuid) {
        self.users.lock().unwrap().retain(|user| user.id != id);
    }
}

#[async_trait]
impl Repository for MockRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user.id == id)
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> RepoResult<User> {
        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name,
            email: new_user.email.to_lowercase(),
            password_hash: new_user.password_hash,
            role: new_user.role,
            created_at: Utc::now(),
        };
        self.users.lock().unwrap().push(user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        Ok(self.users.lock().unwrap().clone())
    }
}

// --- Failing Token Store ---

/// A token store whose every call fails, as when Redis drops mid-run.
pub struct FailingStore;

#[async_trait]
impl TokenStore for FailingStore {
    async fn increment(&self, _key: &str, _window: Duration) -> StoreResult<Hit> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn decrement(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn reset(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn blacklist(&self, _token: &str, _ttl: Duration) -> StoreResult<()> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn claim(&self, _token: &str, _ttl: Duration) -> StoreResult<bool> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn is_blacklisted(&self, _token: &str) -> StoreResult<bool> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

// --- Flaky Token Store ---

/// An in-memory store that can be switched off, as when Redis is down for a while.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryTokenStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn down() -> Self {
        Self {
            inner: MemoryTokenStore::new(),
            down: AtomicBool::new(true),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TokenStore for FlakyStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit> {
        self.check()?;
        self.inner.increment(key, window).await
    }
    async fn decrement(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.decrement(key).await
    }
    async fn reset(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.reset(key).await
    }
    async fn blacklist(&self, token: &str, ttl: Duration) -> StoreResult<()> {
        self.check()?;
        self.inner.blacklist(token, ttl).await
    }
    async fn claim(&self, token: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.claim(token, ttl).await
    }
    async fn is_blacklisted(&self, token: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.is_blacklisted(token).await
    }
}

// --- Yielding Token Store ---

/// An in-memory store that yields to the scheduler before every call, like a network
/// round trip, so concurrent requests interleave between their store calls.
#[derive(Default)]
pub struct YieldingStore {
    inner: MemoryTokenStore,
}

#[async_trait]
impl TokenStore for YieldingStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit> {
        tokio::task::yield_now().await;
        self.inner.increment(key, window).await
    }
    async fn decrement(&self, key: &str) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.decrement(key).await
    }
    async fn reset(&self, key: &str) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.reset(key).await
    }
    async fn blacklist(&self, token: &str, ttl: Duration) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.blacklist(token, ttl).await
    }
    async fn claim(&self, token: &str, ttl: Duration) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.claim(token, ttl).await
    }
    async fn is_blacklisted(&self, token: &str) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.is_blacklisted(token).await
    }
}

// --- Fixtures ---

/// A stored user whose password is `TEST_PASSWORD`.
pub fn make_user(role: Role) -> User {
    let id = Uuid::new_v4();
    User {
        id,
        name: format!("{role} {}", &id.to_string()[..8]),
        email: format!("{role}-{id}@example.com"),
        password_hash: TEST_PASSWORD_HASH.clone(),
        role,
        created_at: Utc::now(),
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.jwt_secret = TEST_JWT_SECRET.to_string();
    config
}

pub fn test_state(repo: MockRepository, tokens: Option<TokenStoreState>) -> AppState {
    AppState::new(Arc::new(repo), tokens, test_config())
}

pub fn test_state_with(
    repo: MockRepository,
    tokens: Option<TokenStoreState>,
    config: AppConfig,
) -> AppState {
    AppState::new(Arc::new(repo), tokens, config)
}

pub fn token_for(user_id: Uuid, kind: TokenKind, ttl: Duration) -> String {
    encode_token(&Claims::new(user_id, kind, ttl), TEST_JWT_SECRET).unwrap()
}

pub fn access_token(user_id: Uuid) -> String {
    token_for(user_id, TokenKind::Access, Duration::from_secs(3600))
}

/// A correctly signed access token that expired a minute ago.
pub fn expired_token(user_id: Uuid) -> String {
    let mut claims = Claims::new(user_id, TokenKind::Access, Duration::from_secs(0));
    claims.iat -= 120;
    claims.exp -= 60;
    encode_token(&claims, TEST_JWT_SECRET).unwrap()
}

/// Request parts carrying `Authorization: Bearer <token>` when given.
pub fn request_parts(token: Option<&str>) -> Parts {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri("/api/auth/me".parse::<Uri>().unwrap());
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let (parts, _) = builder.body(axum::body::Body::empty()).unwrap().into_parts();
    parts
}
