#![allow(clippy::missing_docs_in_private_items)]

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};

use api_state::ApiState;
use routes::{liveness::live, readiness::ready, topics::list_topics, upload::upload_documents};

pub mod api_state;
pub mod error;
mod routes;

/// Upper bound for a whole multipart request; individual files are capped at
/// 10 MiB by the upload handler.
const MAX_UPLOAD_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Router for the knowledge API, version 1.
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public probes for k8s/systemd.
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let knowledge = Router::new()
        .route(
            "/knowledge/upload",
            post(upload_documents).layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES)),
        )
        .route("/knowledge/topics", get(list_topics));

    public.merge(knowledge)
}

#[cfg(test)]
mod tests;
