use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use dashmap::mapref::entry::Entry;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::OnceCell, time::Instant};

// 1. TokenStore Contract

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token store unreachable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Hit
///
/// Counter state right after an increment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Time until the window (and the counter) expires.
    pub reset_after: Duration,
}

/// TokenStore
///
/// Key-value store holding the token blacklist and the fixed-window request counters.
/// `RedisTokenStore` shares state across server instances; `MemoryTokenStore` keeps it
/// in-process and backs the rate limiter whenever Redis cannot be reached.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Increments `key`. The first increment of a window arms its expiry to `window`.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit>;

    /// Refunds one request previously counted against `key`.
    async fn decrement(&self, key: &str) -> StoreResult<()>;

    /// Clears `key` entirely.
    async fn reset(&self, key: &str) -> StoreResult<()>;

    /// Marks `token` as revoked for `ttl` (the token's remaining validity).
    async fn blacklist(&self, token: &str, ttl: Duration) -> StoreResult<()>;

    /// Blacklists `token` only if it is not already. Returns false when it was, so of
    /// several concurrent callers exactly one wins. The entry lives at least one second.
    async fn claim(&self, token: &str, ttl: Duration) -> StoreResult<bool>;

    /// Whether `token` is currently revoked.
    async fn is_blacklisted(&self, token: &str) -> StoreResult<bool>;
}

/// TokenStoreState
///
/// The concrete type used to share the token store across the application state.
pub type TokenStoreState = Arc<dyn TokenStore>;

fn blacklist_key(token: &str) -> String {
    format!("blacklist:{token}")
}

/// Upper bound on how long a blacklist entry is kept.
const MAX_BLACKLIST_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Blacklist entry lifetime: the token's remaining validity, capped so that tokens
/// signed with an absurd lifetime cannot overflow the store's expiry arithmetic.
fn blacklist_ttl(ttl: Duration) -> Duration {
    ttl.min(MAX_BLACKLIST_TTL)
}

// 2. The Real Implementation (Redis)

/// Pause after a failed connection attempt before the next one is made.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// RedisTokenStore
///
/// Redis-backed store. The connection is opened on first use, not at construction, so a
/// Redis that is down at startup only degrades the calls made while it is down. After a
/// failed attempt, calls fail fast with `StoreError::Unavailable` for `RECONNECT_DELAY`
/// before the next attempt. Once established, the `ConnectionManager` multiplexes one
/// connection across all requests and reconnects in the background after a failure.
pub struct RedisTokenStore {
    client: redis::Client,
    connect_timeout: Duration,
    conn: OnceCell<ConnectionManager>,
    next_attempt: Mutex<Option<Instant>>,
}

impl RedisTokenStore {
    /// new
    ///
    /// Validates `url` without connecting.
    pub fn new(url: &str, connect_timeout: Duration) -> StoreResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connect_timeout,
            conn: OnceCell::new(),
            next_attempt: Mutex::new(None),
        })
    }

    /// ping
    ///
    /// Round trip to the server, connecting first if needed.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        if let Some(conn) = self.conn.get() {
            return Ok(conn.clone());
        }

        let next_attempt = *lock(&self.next_attempt);
        if next_attempt.is_some_and(|at| Instant::now() < at) {
            return Err(StoreError::Unavailable(
                "waiting before the next connection attempt".to_string(),
            ));
        }

        let result = self
            .conn
            .get_or_try_init(|| async {
                let conn = tokio::time::timeout(
                    self.connect_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .map_err(|_| {
                    StoreError::Unavailable(format!(
                        "no connection within {}ms",
                        self.connect_timeout.as_millis()
                    ))
                })??;
                tracing::info!("connected to redis token store");
                Ok::<_, StoreError>(conn)
            })
            .await;

        match result {
            Ok(conn) => Ok(conn.clone()),
            Err(e) => {
                *lock(&self.next_attempt) = Some(Instant::now() + RECONNECT_DELAY);
                Err(e)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit> {
        let mut conn = self.connection().await?;
        let window_secs = window.as_secs().max(1);

        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await?;
        }

        // INCR and TTL are separate round trips, so the TTL may be slightly stale.
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        let reset_after = if ttl > 0 {
            Duration::from_secs(ttl as u64)
        } else {
            // The key lost its expiry (e.g. the EXPIRE after INCR never ran). Re-arm it.
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await?;
            Duration::from_secs(window_secs)
        };

        Ok(Hit { count, reset_after })
    }

    async fn decrement(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let remaining: i64 = redis::cmd("DECR").arg(key).query_async(&mut conn).await?;
        if remaining <= 0 {
            let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        }
        Ok(())
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn blacklist(&self, token: &str, ttl: Duration) -> StoreResult<()> {
        let secs = blacklist_ttl(ttl).as_secs();
        if secs == 0 {
            // Already expired; verification rejects it anyway.
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SET")
            .arg(blacklist_key(token))
            .arg("1")
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn claim(&self, token: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        // NX makes the check and the write one command.
        let set: Option<String> = redis::cmd("SET")
            .arg(blacklist_key(token))
            .arg("1")
            .arg("EX")
            .arg(blacklist_ttl(ttl).as_secs().max(1))
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    async fn is_blacklisted(&self, token: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let exists: u64 = redis::cmd("EXISTS")
            .arg(blacklist_key(token))
            .query_async(&mut conn)
            .await?;
        Ok(exists > 0)
    }
}

// 3. The In-Process Implementation (fallback and tests)

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

/// MemoryTokenStore
///
/// Process-local store. Counts are per server instance only, so quotas are not global
/// when several instances run. Expiry uses `tokio::time::Instant`, which lets tests
/// drive window boundaries with a paused clock.
#[derive(Default)]
pub struct MemoryTokenStore {
    counters: DashMap<String, Counter>,
    revoked: DashMap<String, Instant>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// count
    ///
    /// Infallible increment. A counter whose window has passed starts over at one.
    pub fn count(&self, key: &str, window: Duration) -> Hit {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + window,
        });

        let counter = entry.value_mut();
        if counter.expires_at <= now {
            counter.count = 0;
            counter.expires_at = now + window;
        }
        counter.count += 1;

        Hit {
            count: counter.count,
            reset_after: counter.expires_at.saturating_duration_since(now),
        }
    }

    pub fn refund(&self, key: &str) {
        if let Some(mut entry) = self.counters.get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    pub fn clear(&self, key: &str) {
        self.counters.remove(key);
    }

    /// purge_expired
    ///
    /// Drops every expired counter and blacklist entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len() + self.revoked.len();
        self.counters.retain(|_, counter| counter.expires_at > now);
        self.revoked.retain(|_, expires_at| *expires_at > now);
        before - (self.counters.len() + self.revoked.len())
    }

    /// Number of live counters (expired ones still count until purged).
    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit> {
        Ok(self.count(key, window))
    }

    async fn decrement(&self, key: &str) -> StoreResult<()> {
        self.refund(key);
        Ok(())
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        self.clear(key);
        Ok(())
    }

    async fn blacklist(&self, token: &str, ttl: Duration) -> StoreResult<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.revoked
            .insert(blacklist_key(token), Instant::now() + blacklist_ttl(ttl));
        Ok(())
    }

    async fn claim(&self, token: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let expires_at = now + blacklist_ttl(ttl).max(Duration::from_secs(1));
        match self.revoked.entry(blacklist_key(token)) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return Ok(false);
                }
                entry.insert(expires_at);
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
            }
        }
        Ok(true)
    }

    async fn is_blacklisted(&self, token: &str) -> StoreResult<bool> {
        let key = blacklist_key(token);
        let now = Instant::now();
        let live = self
            .revoked
            .get(&key)
            .map(|expires_at| *expires_at > now);

        match live {
            Some(true) => Ok(true),
            Some(false) => {
                self.revoked.remove(&key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
