//! Credential logic: token codecs, permission compilation and refresh tokens.
//!
//! Shared by the HTTP surface in `clubpass_api` and the bus surface in
//! `clubpass_bus`.

pub mod bus_jwt;
pub mod permissions;
pub mod queries;
pub mod refresh;
pub mod session_token;

use thiserror::Error;

/// Errors raised while signing or verifying tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    ExpiredToken,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Errors raised by refresh-token stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
