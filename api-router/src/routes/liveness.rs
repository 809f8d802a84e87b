use axum::{http::StatusCode, response::IntoResponse};

/// Process liveness probe.
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
