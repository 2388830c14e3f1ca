//! Health probe

use axum::response::Json;

use super::types::HealthResponse;

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        provider: "rag",
    })
}
