use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Every handler here receives a verified `AuthUser`: the router is wrapped in
/// `require_auth`, which rejects missing, revoked, invalid or orphaned tokens before
/// any handler runs.
pub fn authenticated_routes() -> Router<AppState> {
    Router::new()
        // POST /auth/logout
        // Blacklists the presented access token until it would have expired.
        .route("/auth/logout", post(handlers::logout))
        // GET /auth/me
        // Profile of the caller.
        .route("/auth/me", get(handlers::get_me))
        // GET /users/me
        // Same profile, under the users resource.
        .route("/users/me", get(handlers::get_me))
}
