use std::collections::BTreeMap;

use axum::{extract::{Query, State}, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use common::storage::types::graph_build_status::{BuildStatus, GraphBuildStatus};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct TopicsQuery {
    pub database_uri: Option<String>,
}

#[derive(Default)]
struct TopicCounts {
    total: usize,
    pending: usize,
    processing: usize,
    completed: usize,
    failed: usize,
    latest_update: Option<DateTime<Utc>>,
}

/// `GET /api/v1/knowledge/topics` — per `(topic, database_uri)` status
/// summary. All scheduling state is centralized in the local store, so this
/// never needs to reach a tenant database.
pub async fn list_topics(
    State(state): State<ApiState>,
    Query(query): Query<TopicsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let local = state.registry.local();
    let rows: Vec<GraphBuildStatus> = local
        .get_all_stored_items()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let mut grouped: BTreeMap<(String, String), TopicCounts> = BTreeMap::new();
    for row in rows {
        if let Some(filter) = &query.database_uri {
            if &row.external_database_uri != filter {
                continue;
            }
        }

        let counts = grouped
            .entry((row.external_database_uri.clone(), row.topic_name.clone()))
            .or_default();
        counts.total += 1;
        match row.status {
            BuildStatus::Pending => counts.pending += 1,
            BuildStatus::Processing => counts.processing += 1,
            BuildStatus::Completed => counts.completed += 1,
            BuildStatus::Failed => counts.failed += 1,
        }
        counts.latest_update = match counts.latest_update {
            Some(latest) if latest >= row.updated_at => Some(latest),
            _ => Some(row.updated_at),
        };
    }

    let topics: Vec<_> = grouped
        .into_iter()
        .map(|((database_uri, topic_name), counts)| {
            json!({
                "topic_name": topic_name,
                "database_uri": database_uri,
                "total_documents": counts.total,
                "pending_count": counts.pending,
                "processing_count": counts.processing,
                "completed_count": counts.completed,
                "failed_count": counts.failed,
                "latest_update": counts.latest_update.map(|dt| dt.to_rfc3339()),
            })
        })
        .collect();

    Ok(Json(json!({
        "status": "success",
        "data": {
            "total_topics": topics.len(),
            "topics": topics,
            "filter_database_uri": query.database_uri,
            "source": "local_database",
        },
    })))
}
