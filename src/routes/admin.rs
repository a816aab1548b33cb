use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Admin Router Module
///
/// Operational endpoints for administrators. Nested under `/api/admin` and wrapped,
/// outermost first, in `require_auth` and a `RoleGuard` admitting only `admin`.
/// Any other role is answered with 403 naming that role.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/users
        // Lists every account.
        .route("/users", get(handlers::list_users))
        // DELETE /admin/rate-limits/{client}
        // Clears a client's counters in every limiter (IP or `user:<id>`).
        .route("/rate-limits/{client}", delete(handlers::reset_rate_limit))
        // POST /admin/tokens/revoke
        // Blacklists an arbitrary token until it expires.
        .route("/tokens/revoke", post(handlers::revoke_token))
}
