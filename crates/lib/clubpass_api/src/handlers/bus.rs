//! Bus key material.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::IssuerResponse;

/// `GET /bus/issuer`: public key that signs bus credentials.
pub async fn issuer_handler(State(state): State<AppState>) -> AppResult<Json<IssuerResponse>> {
    let signer = state
        .sessions
        .bus_signer()
        .ok_or_else(|| AppError::NotFound("bus credentials are disabled".into()))?;
    Ok(Json(IssuerResponse {
        public_key: signer.public_key().to_string(),
        issuer_account: signer.issuer_account().to_string(),
    }))
}
