use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::{auth::AuthUser, error::ApiError, models::Role};

/// RoleGuard
///
/// The set of roles allowed past a route. Cheap to clone; used both as middleware
/// state (`require_role`) and directly inside handlers.
#[derive(Debug, Clone)]
pub struct RoleGuard {
    allowed: Arc<[Role]>,
}

impl RoleGuard {
    pub fn new(roles: &[Role]) -> Self {
        Self {
            allowed: Arc::from(roles),
        }
    }

    pub fn allows(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }

    /// authorize
    ///
    /// Pure membership check. The rejection names the caller's role.
    pub fn authorize(&self, user: &AuthUser) -> Result<(), ApiError> {
        if self.allows(user.role) {
            Ok(())
        } else {
            tracing::warn!(user_id = %user.id, role = %user.role, "role not permitted");
            Err(ApiError::Forbidden { role: user.role })
        }
    }
}

/// require_role
///
/// Middleware applied inside `require_auth`. Reads the identity the auth gate attached;
/// a request without one never passed authentication and is rejected as such.
pub async fn require_role(
    State(guard): State<RoleGuard>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(ApiError::Unauthenticated)?;

    guard.authorize(user)?;
    Ok(next.run(request).await)
}
