//! Session model shared with the frontends.
//!
//! `Session` is what login and refresh return. `SessionContext` is the client-side
//! holder of that session: the portal and the customer app keep one instance and
//! pass it through their request cycle instead of reading tokens from browser storage
//! at arbitrary call sites. `Access` and `Authorize` give a single answer to "may this
//! caller enter this route", evaluated once per navigable route.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    models::{Role, User},
};

/// SessionUser
///
/// The user fields a client keeps alongside its tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SessionUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Session
///
/// Body of a successful login, registration or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: SessionUser,
}

/// AuthResponse
///
/// `Session` inside the success envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(flatten)]
    pub session: Session,
}

impl From<Session> for AuthResponse {
    fn from(session: Session) -> Self {
        Self {
            success: true,
            session,
        }
    }
}

/// Access
///
/// Closed set of caller kinds a route can be opened to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Access {
    Admin,
    Customer,
    Driver,
    Owner,
    Unauthenticated,
}

impl From<Role> for Access {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => Access::Admin,
            Role::Customer => Access::Customer,
            Role::Driver => Access::Driver,
            Role::Owner => Access::Owner,
        }
    }
}

/// RouteRule
///
/// Who may enter one navigable route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRule {
    pub path: String,
    allowed: Vec<Access>,
}

impl RouteRule {
    /// Open to everyone, signed in or not.
    pub fn public(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            allowed: vec![
                Access::Admin,
                Access::Customer,
                Access::Driver,
                Access::Owner,
                Access::Unauthenticated,
            ],
        }
    }

    /// Open only to signed-in users holding one of `roles`.
    pub fn for_roles(path: impl Into<String>, roles: &[Role]) -> Self {
        Self {
            path: path.into(),
            allowed: roles.iter().copied().map(Access::from).collect(),
        }
    }

    /// Open only to signed-out visitors (login, register).
    pub fn guests_only(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            allowed: vec![Access::Unauthenticated],
        }
    }

    pub fn permits(&self, access: Access) -> bool {
        self.allowed.contains(&access)
    }
}

/// Authorize
///
/// Anything that can say which kind of caller it is.
pub trait Authorize {
    fn access(&self) -> Access;

    fn may_enter(&self, rule: &RouteRule) -> bool {
        rule.permits(self.access())
    }
}

impl Authorize for AuthUser {
    fn access(&self) -> Access {
        Access::from(self.role)
    }
}

impl Authorize for Option<AuthUser> {
    fn access(&self) -> Access {
        self.as_ref()
            .map_or(Access::Unauthenticated, |user| user.access())
    }
}

/// SessionContext
///
/// Explicit holder of the current session. `invalidate` is the only way to end it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionContext {
    session: Option<Session>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous session with `session`.
    pub fn establish(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Value for the `Authorization` header, when signed in.
    pub fn bearer(&self) -> Option<String> {
        self.session
            .as_ref()
            .map(|session| format!("Bearer {}", session.access_token))
    }

    /// Ends the session, handing back what was dropped so the caller can revoke it
    /// server side (POST /api/auth/logout).
    pub fn invalidate(&mut self) -> Option<Session> {
        self.session.take()
    }
}

impl Authorize for SessionContext {
    fn access(&self) -> Access {
        self.session
            .as_ref()
            .map_or(Access::Unauthenticated, |session| Access::from(session.user.role))
    }
}
