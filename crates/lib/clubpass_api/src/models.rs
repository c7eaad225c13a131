//! Request and response bodies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query string of `GET /login`.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// One-time session token from the magic link.
    pub t: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub status: String,
    pub user_uuid: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketResponse {
    pub ticket: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Public bus key material, for configuring the bus server's callout trust.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssuerResponse {
    pub public_key: String,
    pub issuer_account: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
