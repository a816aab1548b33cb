use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::task::JoinHandle;

use crate::{
    auth::AuthUser,
    config::RateLimitSettings,
    error::{ApiError, ApiResult},
    store::{Hit, MemoryTokenStore, TokenStoreState},
};

/// RateLimitConfig
///
/// One fixed-window limiter: its key prefix (the route group), quota and options.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub prefix: String,
    pub window: Duration,
    pub max_requests: u64,
    pub message: String,
    /// Refund requests the handler answered with a status >= 400.
    pub skip_failed_requests: bool,
    /// Refund requests the handler answered with a status < 400.
    pub skip_successful_requests: bool,
}

impl RateLimitConfig {
    /// General limiter applied to every `/api` route.
    pub fn api(settings: &RateLimitSettings) -> Self {
        Self {
            prefix: "rl:api".to_string(),
            window: settings.window,
            max_requests: settings.max_requests,
            message: "Too many requests from this IP, please try again later.".to_string(),
            skip_failed_requests: settings.skip_failed_requests,
            skip_successful_requests: false,
        }
    }

    /// Login/registration limiter. Only unsuccessful attempts count.
    pub fn auth(settings: &RateLimitSettings) -> Self {
        Self {
            prefix: "rl:auth".to_string(),
            window: settings.window,
            max_requests: settings.auth_max_requests,
            message: "Too many authentication attempts, please try again later.".to_string(),
            skip_failed_requests: false,
            skip_successful_requests: true,
        }
    }
}

/// Which store counted a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The shared token store (global quota).
    Shared,
    /// The in-process fallback (per-instance quota).
    Local,
}

/// RateLimitInfo
///
/// Outcome of counting one request.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub count: u64,
    pub reset_after: Duration,
    pub reset_time: DateTime<Utc>,
    pub backend: Backend,
}

impl RateLimitInfo {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }

    pub fn exceeded(&self) -> bool {
        self.count > self.limit
    }
}

/// RateLimiter
///
/// Fixed-window counter over the shared token store. When the store is disabled or a
/// call to it fails, counting continues in the in-process store: quota is then enforced
/// per instance only, but traffic keeps flowing.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    shared: Option<TokenStoreState>,
    local: Arc<MemoryTokenStore>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, shared: Option<TokenStoreState>) -> Self {
        Self {
            config: Arc::new(config),
            shared,
            local: Arc::new(MemoryTokenStore::new()),
        }
    }

    /// Uses `local` as the fallback store, so several limiters can share one sweeper.
    pub fn with_local_store(mut self, local: Arc<MemoryTokenStore>) -> Self {
        self.local = local;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn key(&self, client: &str) -> String {
        format!("{}:{}", self.config.prefix, client)
    }

    /// hit
    ///
    /// Counts one request for `client` and reports the window state.
    pub async fn hit(&self, client: &str) -> RateLimitInfo {
        let key = self.key(client);
        let window = self.config.window;

        let (hit, backend) = match &self.shared {
            Some(store) => match store.increment(&key, window).await {
                Ok(hit) => (hit, Backend::Shared),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        key = %key,
                        "token store unreachable; counting in-process"
                    );
                    (self.local.count(&key, window), Backend::Local)
                }
            },
            None => (self.local.count(&key, window), Backend::Local),
        };

        self.info(hit, backend)
    }

    fn info(&self, hit: Hit, backend: Backend) -> RateLimitInfo {
        let reset_time = Utc::now()
            + chrono::Duration::from_std(hit.reset_after).unwrap_or_else(|_| chrono::Duration::zero());

        RateLimitInfo {
            limit: self.config.max_requests,
            count: hit.count,
            reset_after: hit.reset_after,
            reset_time,
            backend,
        }
    }

    pub fn rejection(&self, info: &RateLimitInfo) -> ApiError {
        ApiError::RateLimited {
            message: self.config.message.clone(),
            reset_time: info.reset_time,
        }
    }

    /// decrement
    ///
    /// Refunds one request in the store that counted it.
    pub async fn decrement(&self, client: &str, backend: Backend) {
        let key = self.key(client);
        match (backend, &self.shared) {
            (Backend::Shared, Some(store)) => {
                if let Err(e) = store.decrement(&key).await {
                    tracing::warn!(error = %e, key = %key, "failed to refund request");
                }
            }
            _ => self.local.refund(&key),
        }
    }

    /// reset
    ///
    /// Administrative clear of `client`'s counter in both stores.
    pub async fn reset(&self, client: &str) -> ApiResult<()> {
        let key = self.key(client);
        self.local.clear(&key);
        if let Some(store) = &self.shared {
            store.reset(&key).await?;
        }
        tracing::info!(key = %key, "rate limit counter reset");
        Ok(())
    }
}

/// RateLimiters
///
/// The limiters mounted by the router, sharing one in-process fallback store.
#[derive(Clone)]
pub struct RateLimiters {
    pub api: RateLimiter,
    pub auth: RateLimiter,
    local: Arc<MemoryTokenStore>,
}

impl RateLimiters {
    pub fn new(settings: &RateLimitSettings, shared: Option<TokenStoreState>) -> Self {
        let local = Arc::new(MemoryTokenStore::new());
        Self {
            api: RateLimiter::new(RateLimitConfig::api(settings), shared.clone())
                .with_local_store(local.clone()),
            auth: RateLimiter::new(RateLimitConfig::auth(settings), shared)
                .with_local_store(local.clone()),
            local,
        }
    }

    pub fn local_store(&self) -> Arc<MemoryTokenStore> {
        self.local.clone()
    }

    /// Clears `client` in every limiter.
    pub async fn reset(&self, client: &str) -> ApiResult<()> {
        self.api.reset(client).await?;
        self.auth.reset(client).await
    }
}

/// spawn_sweeper
///
/// Periodically drops expired in-process counters so the fallback store does not grow
/// with every client ever seen.
pub fn spawn_sweeper(store: Arc<MemoryTokenStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired rate limit entries");
            }
        }
    })
}

/// client_key
///
/// Identifies the caller: the authenticated principal when one is attached, else the
/// first `X-Forwarded-For` hop, else the peer address.
pub fn client_key(request: &Request) -> String {
    if let Some(user) = request.extensions().get::<AuthUser>() {
        return format!("user:{}", user.id);
    }

    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// rate_limit
///
/// Middleware counting every request routed through it against `limiter`.
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);

    let info = limiter.hit(&client).await;
    if info.exceeded() {
        tracing::warn!(
            client = %client,
            prefix = %limiter.config().prefix,
            count = info.count,
            limit = info.limit,
            "rate limit exceeded"
        );
        let mut response = limiter.rejection(&info).into_response();
        apply_headers(response.headers_mut(), &info, true);
        return response;
    }

    let mut response = next.run(request).await;

    let status = response.status();
    let failed = status.is_client_error() || status.is_server_error();
    let config = limiter.config();
    if (failed && config.skip_failed_requests) || (!failed && config.skip_successful_requests) {
        limiter.decrement(&client, info.backend).await;
    }

    apply_headers(response.headers_mut(), &info, false);
    response
}

fn apply_headers(headers: &mut HeaderMap, info: &RateLimitInfo, rejected: bool) {
    // Whole seconds, rounded up so clients never retry early.
    let reset_secs = info.reset_after.as_secs() + u64::from(info.reset_after.subsec_nanos() > 0);

    let pairs = [
        ("ratelimit-limit", info.limit),
        ("ratelimit-remaining", info.remaining()),
        ("ratelimit-reset", reset_secs),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    if rejected {
        if let Ok(value) = HeaderValue::from_str(&reset_secs.to_string()) {
            headers.insert(header::RETRY_AFTER, value);
        }
    }
}
