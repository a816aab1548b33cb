use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use thiserror::Error;

use crate::{models::Role, store::StoreError};

/// ApiError
///
/// Every failure a request can end in. Each variant maps to one HTTP status and renders
/// the same JSON envelope: `{success: false, message, kind}` (plus `resetTime` when rate
/// limited).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Access denied. No token provided.")]
    Unauthenticated,

    #[error("Token has been revoked. Please log in again.")]
    TokenRevoked,

    #[error("Invalid or expired token.")]
    TokenInvalid,

    #[error("User belonging to this token no longer exists.")]
    UserNotFound,

    #[error("User role {role} is not authorized to access this route")]
    Forbidden { role: Role },

    #[error("{message}")]
    RateLimited {
        message: String,
        reset_time: DateTime<Utc>,
    },

    #[error("Token store unavailable")]
    StoreUnavailable(String),

    #[error("Invalid email or password.")]
    InvalidCredentials,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated
            | Self::TokenRevoked
            | Self::TokenInvalid
            | Self::UserNotFound
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable discriminant, sent as `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "Unauthenticated",
            Self::TokenRevoked => "TokenRevoked",
            Self::TokenInvalid => "TokenInvalid",
            Self::UserNotFound => "UserNotFound",
            Self::Forbidden { .. } => "Forbidden",
            Self::RateLimited { .. } => "RateLimited",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::BadRequest(_) => "BadRequest",
            Self::Conflict(_) => "Conflict",
            Self::NotFound(_) => "NotFound",
            Self::Internal(_) => "Internal",
        }
    }
}

/// ErrorBody
///
/// The uniform error envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    message: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_time: Option<DateTime<Utc>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            // Internal details are logged, never sent to the client.
            Self::Internal(detail) | Self::StoreUnavailable(detail) => {
                tracing::error!(kind = self.kind(), detail = %detail, "request failed");
            }
            _ => tracing::debug!(kind = self.kind(), status = status.as_u16(), "request rejected"),
        }

        let reset_time = match &self {
            Self::RateLimited { reset_time, .. } => Some(*reset_time),
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            message: self.to_string(),
            kind: self.kind(),
            reset_time,
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(format!("database error: {e}"))
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::StoreUnavailable(e.to_string())
    }
}

/// Payload
///
/// JSON body extractor whose rejection goes through the same envelope as every other
/// error, instead of axum's plain-text rejection.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(Payload(value))
    }
}

/// not_found
///
/// Router fallback: unmatched paths get the envelope too.
pub async fn not_found(request: Request) -> ApiError {
    ApiError::NotFound(format!("Route {} {} not found", request.method(), request.uri().path()))
}

/// handle_panic
///
/// `CatchPanicLayer` hook. A panicking handler becomes a 500 envelope rather than a
/// dropped connection.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    let mut response = ApiError::Internal(detail).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}
