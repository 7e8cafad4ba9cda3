//! Health handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /health   -> storage backend connectivity

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            error: None,
        }),
    )
}

/// `GET /health`
///
/// Asks the storage backend to list its buckets. 200 with `UP` when that
/// succeeds within the backend timeout, 503 with `DOWN` and the reason
/// otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.files.check_backend().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "UP",
                error: None,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "backend health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "DOWN",
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}

/// `GET /`: public greeting.
pub async fn welcome() -> &'static str {
    "Welcome to the file gateway"
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}
