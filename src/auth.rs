use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{FromRef, FromRequestParts, Request},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    AppState,
    error::{ApiError, ApiResult},
    models::{Role, User},
    session::{Session, SessionUser},
    store::TokenStoreState,
};

/// TokenKind
///
/// Access tokens authenticate requests; refresh tokens can only be exchanged for a new pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims
///
/// Payload signed into every session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id, resolved against the user store on every request.
    pub sub: Uuid,
    /// Issued at (seconds since the epoch).
    pub iat: i64,
    /// Expiry (seconds since the epoch).
    pub exp: i64,
    /// Unique token id. Two tokens issued in the same second still differ.
    pub jti: Uuid,
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

impl Claims {
    pub fn new(sub: Uuid, kind: TokenKind, ttl: Duration) -> Self {
        let iat = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            sub,
            iat,
            exp: iat.saturating_add(ttl_secs),
            jti: Uuid::new_v4(),
            kind,
        }
    }

    /// Time left before the token expires on its own. Zero once expired.
    pub fn remaining_validity(&self) -> Duration {
        let left = self.exp - Utc::now().timestamp();
        Duration::from_secs(left.max(0) as u64)
    }
}

// --- Token signing ---

pub fn encode_token(claims: &Claims, secret: &str) -> ApiResult<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
}

/// decode_token
///
/// Verifies signature and expiry. Any failure (bad signature, malformed, expired) is
/// reported as `TokenInvalid`; the precise reason is only logged.
pub fn decode_token(token: &str, secret: &str) -> ApiResult<Claims> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(reason = ?e.kind(), "token verification failed");
            ApiError::TokenInvalid
        })
}

/// verify_token
///
/// `decode_token` plus a check that the token is of the expected kind.
pub fn verify_token(token: &str, kind: TokenKind, secret: &str) -> ApiResult<Claims> {
    let claims = decode_token(token, secret)?;
    if claims.kind != kind {
        tracing::debug!(expected = ?kind, found = ?claims.kind, "token kind mismatch");
        return Err(ApiError::TokenInvalid);
    }
    Ok(claims)
}

/// issue_session
///
/// Signs a fresh access/refresh pair for `user`.
pub fn issue_session(
    user: &User,
    secret: &str,
    access_ttl: Duration,
    refresh_ttl: Duration,
) -> ApiResult<Session> {
    let access = Claims::new(user.id, TokenKind::Access, access_ttl);
    let refresh = Claims::new(user.id, TokenKind::Refresh, refresh_ttl);

    Ok(Session {
        access_token: encode_token(&access, secret)?,
        refresh_token: encode_token(&refresh, secret)?,
        user: SessionUser::from(user),
    })
}

// --- Blacklist ---

/// ensure_not_revoked
///
/// Rejects blacklisted tokens. With no store configured the check is skipped; a store
/// that fails at runtime is logged and the token let through.
pub async fn ensure_not_revoked(tokens: Option<&TokenStoreState>, token: &str) -> ApiResult<()> {
    let Some(store) = tokens else {
        return Ok(());
    };

    match store.is_blacklisted(token).await {
        Ok(true) => Err(ApiError::TokenRevoked),
        Ok(false) => Ok(()),
        Err(e) => {
            tracing::warn!(error = %e, "blacklist lookup failed; skipping revocation check");
            Ok(())
        }
    }
}

/// revoke
///
/// Blacklists `token` for the rest of its validity. Returns false when no store is
/// configured, in which case the token stays usable until it expires.
pub async fn revoke(
    tokens: Option<&TokenStoreState>,
    token: &str,
    claims: &Claims,
) -> ApiResult<bool> {
    let Some(store) = tokens else {
        tracing::warn!(
            user_id = %claims.sub,
            "token store disabled; token remains valid until natural expiry"
        );
        return Ok(false);
    };

    store.blacklist(token, claims.remaining_validity()).await?;
    tracing::info!(user_id = %claims.sub, kind = ?claims.kind, "token revoked");
    Ok(true)
}

/// claim_refresh
///
/// Blacklists a refresh token as part of rotating it. The check and the write are one
/// store operation, so when the same token is presented concurrently only one caller
/// gets a new pair and the others see `TokenRevoked`.
pub async fn claim_refresh(
    tokens: Option<&TokenStoreState>,
    token: &str,
    claims: &Claims,
) -> ApiResult<()> {
    let Some(store) = tokens else {
        tracing::warn!(
            user_id = %claims.sub,
            "token store disabled; refresh token remains valid until natural expiry"
        );
        return Ok(());
    };

    if !store.claim(token, claims.remaining_validity()).await? {
        tracing::warn!(user_id = %claims.sub, "refresh token reused");
        return Err(ApiError::TokenRevoked);
    }
    tracing::info!(user_id = %claims.sub, "refresh token rotated");
    Ok(())
}

// --- Passwords ---

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

// --- Request identity ---

/// Returns the credential from `Authorization: Bearer <token>`, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// AuthUser
///
/// The resolved identity of an authenticated request. Attached to the request
/// extensions by the auth gate and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

/// authenticate
///
/// The auth gate proper, in order: blacklist lookup, signature/expiry verification,
/// user store lookup.
pub async fn authenticate(state: &AppState, token: &str) -> ApiResult<AuthUser> {
    ensure_not_revoked(state.tokens.as_ref(), token).await?;

    let claims = verify_token(token, TokenKind::Access, &state.config.jwt_secret)?;

    // A valid token for a deleted user must not authenticate.
    let user = state
        .repo
        .get_user(claims.sub)
        .await?
        .ok_or(ApiError::UserNotFound)?;

    Ok(AuthUser {
        id: user.id,
        role: user.role,
    })
}

/// AuthUser Extractor Implementation
///
/// Usable as a handler argument on any protected route. If the auth gate already ran
/// for this request the attached identity is reused, so verification happens once.
///
/// Rejection: `ApiError` (401) on any failure.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthenticated)?;

        let user = authenticate(&state, token).await?;
        tracing::debug!(user_id = %user.id, role = %user.role, "request authenticated");

        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// require_auth
///
/// Middleware guarding the authenticated and admin routers. Running the `AuthUser`
/// extractor rejects the request before any handler on failure; on success the identity
/// is attached for the role guard and the handlers.
pub async fn require_auth(
    auth_user: AuthUser,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}
