//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use clubpass_core::session::SessionError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
///
/// Messages are fixed reason strings; internal detail is only logged.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            ),
            AppError::Internal(detail) => {
                error!(detail = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidRole(_) => AppError::Validation("invalid role".into()),
            SessionError::MissingToken => AppError::Validation("missing token".into()),
            SessionError::InvalidToken(_) => AppError::Unauthorized("invalid token".into()),
            SessionError::InvalidRefreshToken => {
                AppError::Unauthorized("invalid refresh token".into())
            }
            SessionError::SessionExpired => AppError::Unauthorized("session expired".into()),
            SessionError::SessionRevoked => AppError::Unauthorized("session revoked".into()),
            SessionError::Unauthorized(_) => AppError::Unauthorized("unauthorized".into()),
            SessionError::NotConfigured(_)
            | SessionError::Timeout(_)
            | SessionError::Internal(_) => AppError::Internal(e.to_string()),
        }
    }
}
