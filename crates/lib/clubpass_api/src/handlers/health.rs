use axum::Json;

use crate::models::HealthResponse;

/// `GET /healthz`
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: clubpass_core::version().into(),
    })
}
