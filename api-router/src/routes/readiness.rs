use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::api_state::ApiState;

/// Readiness probe: the local store must answer a trivial query.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    match state.registry.local().validate().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
