use crate::{
    AppState, handlers,
    rate_limit::{RateLimiter, rate_limit},
};
use axum::{Router, middleware, routing::post};

/// Public Router Module
///
/// Endpoints reachable without a session. Mounted under `/api`, so the general limiter
/// already counts them.
///
/// `auth_limiter` guards credential checks only: a client gets a handful of failed
/// logins or registrations per window, while successful ones are refunded.
pub fn public_routes(auth_limiter: RateLimiter) -> Router<AppState> {
    let credential_routes = Router::new()
        // POST /auth/register
        // Creates a customer, driver or owner account and returns a session.
        .route("/auth/register", post(handlers::register))
        // POST /auth/login
        // Exchanges email and password for a session.
        .route("/auth/login", post(handlers::login))
        .route_layer(middleware::from_fn_with_state(auth_limiter, rate_limit));

    Router::new()
        .merge(credential_routes)
        // POST /auth/refresh
        // Rotates a refresh token into a new pair. The old refresh token is blacklisted.
        .route("/auth/refresh", post(handlers::refresh))
}
