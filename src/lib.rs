use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef},
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod repository;
pub mod session;
pub mod store;

// Routing segregation (Public, Authenticated, Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use rate_limit::RateLimiters;
pub use repository::{PostgresRepository, RepositoryState};
pub use store::{MemoryTokenStore, RedisTokenStore, TokenStoreState};

use guard::RoleGuard;
use models::Role;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// ApiDoc
///
/// OpenAPI document for the gateway, served at `/api-docs/openapi.json` and browsable
/// through the Swagger UI.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health, handlers::register, handlers::login, handlers::refresh,
        handlers::logout, handlers::get_me, handlers::list_users,
        handlers::reset_rate_limit, handlers::revoke_token
    ),
    components(
        schemas(
            models::Role, models::UserProfile, models::RegisterRequest, models::LoginRequest,
            models::RefreshRequest, models::RevokeTokenRequest, models::HealthResponse,
            models::MessageResponse, session::Session, session::SessionUser,
            session::AuthResponse, session::Access,
        )
    ),
    tags(
        (name = "rental-portal", description = "Vehicle rental platform API gateway")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared, cheaply cloneable container for every service a request may need.
#[derive(Clone)]
pub struct AppState {
    /// User store.
    pub repo: RepositoryState,
    /// Shared token store (blacklist and counters). `None` only when disabled by
    /// configuration; an unreachable store stays wired in and is retried.
    pub tokens: Option<TokenStoreState>,
    /// The request limiters, wired to `tokens` with an in-process fallback.
    pub limiters: RateLimiters,
    /// The loaded, immutable configuration.
    pub config: AppConfig,
}

impl AppState {
    pub fn new(repo: RepositoryState, tokens: Option<TokenStoreState>, config: AppConfig) -> Self {
        let limiters = RateLimiters::new(&config.rate_limit, tokens.clone());
        Self {
            repo,
            tokens,
            limiters,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for RateLimiters {
    fn from_ref(app_state: &AppState) -> RateLimiters {
        app_state.limiters.clone()
    }
}

/// create_router
///
/// Assembles the route groups, their access layers and the global middleware stack.
///
/// Layering, innermost first: role guard, auth gate, general `/api` limiter, body limit,
/// request id and tracing, panic recovery, security headers, CORS.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let x_request_id = HeaderName::from_static("x-request-id");

    // 1. The `/api` tree. Every request under it is counted by the general limiter.
    let api = Router::new()
        .merge(public::public_routes(state.limiters.auth.clone()))
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_auth,
            )),
        )
        .nest(
            "/admin",
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(
                    RoleGuard::new(&[Role::Admin]),
                    guard::require_role,
                ))
                // Added last, so it runs first: the guard always sees an identity.
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::require_auth,
                )),
        )
        .layer(middleware::from_fn_with_state(
            state.limiters.api.clone(),
            rate_limit::rate_limit,
        ));

    // 2. Top level: health stays outside the limiter for load balancer probes.
    let base_router = Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(error::not_found)
        .with_state(state);

    // 3. Global layers.
    let router = base_router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(CatchPanicLayer::custom(error::handle_panic));

    let hardened = SECURITY_HEADERS
        .into_iter()
        .fold(router, |router, (name, value)| {
            router.layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            ))
        });

    hardened.layer(cors)
}

/// SECURITY_HEADERS
///
/// Hardening headers added to every response that does not already carry them.
const SECURITY_HEADERS: [(&str, &str); 6] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "SAMEORIGIN"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-dns-prefetch-control", "off"),
    ("cross-origin-opener-policy", "same-origin"),
];

/// cors_layer
///
/// Any origin when none are configured. A configured list allows credentials, which
/// rules out wildcard methods and headers.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring malformed CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// trace_span_logger
///
/// Builds the per-request span so every log line of one request carries its
/// `x-request-id` next to method and URI.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
