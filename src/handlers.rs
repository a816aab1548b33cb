use crate::{
    AppState,
    auth::{self, AuthUser, TokenKind},
    error::{ApiError, ApiResult, Payload},
    models::{
        HealthResponse, LoginRequest, MessageResponse, NewUser, RefreshRequest, RegisterRequest,
        RevokeTokenRequest, Role, UserProfile,
    },
    repository::is_unique_violation,
    session::AuthResponse,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;

const MIN_PASSWORD_LEN: usize = 8;

/// Runs a CPU-heavy password operation off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))
}

// --- Public ---

/// health
///
/// [Public Route] Liveness probe for load balancers. Not rate limited.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Rental API is running".to_string(),
        timestamp: Utc::now(),
    })
}

/// register
///
/// [Public Route] Creates a customer, driver or owner account and signs the new user in.
///
/// *Validation*: non-empty name, an email containing '@', a password of at least
/// 8 characters. Admin accounts are provisioned out of band and cannot be self-registered.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = AuthResponse),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Email already registered"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Payload(payload): Payload<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let name = payload.name.trim().to_string();
    let email = payload.email.trim().to_lowercase();
    let role = payload.role.unwrap_or(Role::Customer);

    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required.".to_string()));
    }
    if !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required.".to_string()));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    if role == Role::Admin {
        return Err(ApiError::BadRequest(
            "Admin accounts cannot be self-registered.".to_string(),
        ));
    }

    let password = payload.password;
    let password_hash = blocking(move || auth::hash_password(&password)).await??;

    let user = state
        .repo
        .create_user(NewUser {
            name,
            email,
            password_hash,
            role,
        })
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict("An account with this email already exists.".to_string())
            } else {
                ApiError::from(e)
            }
        })?;

    tracing::info!(user_id = %user.id, role = %user.role, "user registered");

    let session = auth::issue_session(
        &user,
        &state.config.jwt_secret,
        state.config.access_token_ttl,
        state.config.refresh_token_ttl,
    )?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

/// login
///
/// [Public Route] Exchanges credentials for a token pair. Unknown email and wrong
/// password produce the same `InvalidCredentials` answer.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Payload(payload): Payload<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = state
        .repo
        .find_user_by_email(payload.email.trim())
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let password = payload.password;
    let password_hash = user.password_hash.clone();
    let valid = blocking(move || auth::verify_password(&password, &password_hash)).await?;
    if !valid {
        tracing::info!(user_id = %user.id, "login rejected: wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    tracing::info!(user_id = %user.id, role = %user.role, "user logged in");

    let session = auth::issue_session(
        &user,
        &state.config.jwt_secret,
        state.config.access_token_ttl,
        state.config.refresh_token_ttl,
    )?;
    Ok(Json(session.into()))
}

/// refresh
///
/// [Public Route] Rotates a refresh token: the presented one is blacklisted and a new
/// pair is issued. A token can be rotated once, even under concurrent requests.
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = AuthResponse),
        (status = 401, description = "Refresh token invalid, revoked, or user gone")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Payload(payload): Payload<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let token = payload.refresh_token.trim();
    if token.is_empty() {
        return Err(ApiError::Unauthenticated);
    }

    auth::ensure_not_revoked(state.tokens.as_ref(), token).await?;
    let claims = auth::verify_token(token, TokenKind::Refresh, &state.config.jwt_secret)?;

    let user = state
        .repo
        .get_user(claims.sub)
        .await?
        .ok_or(ApiError::UserNotFound)?;

    auth::claim_refresh(state.tokens.as_ref(), token, &claims).await?;

    let session = auth::issue_session(
        &user,
        &state.config.jwt_secret,
        state.config.access_token_ttl,
        state.config.refresh_token_ttl,
    )?;
    Ok(Json(session.into()))
}

// --- Authenticated ---

/// logout
///
/// [Authenticated Route] Blacklists the presented access token for the rest of its
/// validity. With the token store disabled the token simply expires on its own.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<MessageResponse>> {
    let token = auth::bearer_token(&headers).ok_or(ApiError::Unauthenticated)?;
    let claims = auth::decode_token(token, &state.config.jwt_secret)?;

    auth::revoke(state.tokens.as_ref(), token, &claims).await?;
    tracing::info!(user_id = %user.id, "user logged out");

    Ok(Json(MessageResponse::ok("Logged out successfully")))
}

/// get_me
///
/// [Authenticated Route] Profile of the authenticated user.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_me(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<UserProfile>> {
    let user = state
        .repo
        .get_user(user.id)
        .await?
        .ok_or(ApiError::UserNotFound)?;
    Ok(Json(user.into()))
}

// --- Admin ---

/// list_users
///
/// [Admin Route] Every registered user.
#[utoipa::path(
    get,
    path = "/api/admin/users",
    responses(
        (status = 200, description = "All users", body = [UserProfile]),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<UserProfile>>> {
    let users = state.repo.list_users().await?;
    Ok(Json(users.into_iter().map(UserProfile::from).collect()))
}

/// reset_rate_limit
///
/// [Admin Route] Clears a client's counters in every limiter. `client` is an IP address
/// or `user:<id>`.
#[utoipa::path(
    delete,
    path = "/api/admin/rate-limits/{client}",
    params(("client" = String, Path, description = "Client key (IP or user:<id>)")),
    responses(
        (status = 200, description = "Counters cleared", body = MessageResponse),
        (status = 503, description = "Token store unreachable")
    )
)]
pub async fn reset_rate_limit(
    admin: AuthUser,
    State(state): State<AppState>,
    Path(client): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.limiters.reset(&client).await?;
    tracing::info!(admin_id = %admin.id, client = %client, "rate limit reset by admin");
    Ok(Json(MessageResponse::ok(format!(
        "Rate limit cleared for {client}"
    ))))
}

/// revoke_token
///
/// [Admin Route] Blacklists any validly signed token (access or refresh) until it
/// expires. Requires the token store.
#[utoipa::path(
    post,
    path = "/api/admin/tokens/revoke",
    request_body = RevokeTokenRequest,
    responses(
        (status = 200, description = "Token revoked", body = MessageResponse),
        (status = 400, description = "Token invalid or already expired"),
        (status = 503, description = "Token store disabled or unreachable")
    )
)]
pub async fn revoke_token(
    admin: AuthUser,
    State(state): State<AppState>,
    Payload(payload): Payload<RevokeTokenRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let claims = auth::decode_token(payload.token.trim(), &state.config.jwt_secret)
        .map_err(|_| ApiError::BadRequest("Token is invalid or already expired.".to_string()))?;

    let revoked = auth::revoke(state.tokens.as_ref(), payload.token.trim(), &claims).await?;
    if !revoked {
        return Err(ApiError::StoreUnavailable(
            "token blacklist is disabled".to_string(),
        ));
    }

    tracing::info!(admin_id = %admin.id, subject = %claims.sub, "token revoked by admin");
    Ok(Json(MessageResponse::ok("Token revoked")))
}
