use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::{
    storage::types::graph_build_status::GraphBuildStatus,
    utils::mime::{is_allowed_upload_extension, MAX_FILE_SIZE_BYTES},
};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "unlimited")]
    #[form_data(default)]
    pub files: Vec<FieldData<NamedTempFile>>,
    #[form_data(default)]
    pub links: Vec<String>,
    pub topic_name: String,
    pub database_uri: Option<String>,
}

/// `POST /api/v1/knowledge/upload` — batch document intake.
///
/// Validation failures on the batch shape (counts, link uniqueness,
/// extensions, sizes, tenant URI) reject the whole request; per-file
/// processing failures are collected and reported alongside the successes.
pub async fn upload_documents(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    if input.files.is_empty() {
        return Err(ApiError::ValidationError("No files provided".into()));
    }
    if input.files.len() != input.links.len() {
        return Err(ApiError::ValidationError(format!(
            "Number of files ({}) must match number of links ({})",
            input.files.len(),
            input.links.len()
        )));
    }
    let unique: HashSet<&String> = input.links.iter().collect();
    if unique.len() != input.links.len() {
        return Err(ApiError::ValidationError("All links must be unique".into()));
    }

    let tenant_uri = input.database_uri.unwrap_or_default();
    if !tenant_uri.is_empty() {
        state
            .registry
            .validate(&tenant_uri)
            .await
            .map_err(|err| ApiError::ValidationError(format!("Database connection failed: {err}")))?;
    }

    // Batch-shape checks before any file is persisted.
    for file in &input.files {
        let file_name = required_file_name(file)?;
        if !is_allowed_upload_extension(Path::new(&file_name)) {
            return Err(ApiError::ValidationError(format!(
                "File type of {file_name} not supported. Allowed: .pdf, .md, .txt, .sql"
            )));
        }
        let size = file
            .contents
            .as_file()
            .metadata()
            .map_err(|e| ApiError::InternalError(e.to_string()))?
            .len();
        if size > MAX_FILE_SIZE_BYTES {
            return Err(ApiError::PayloadTooLarge(format!(
                "File {file_name} exceeds the {} MiB limit",
                MAX_FILE_SIZE_BYTES / (1024 * 1024)
            )));
        }
    }

    let tenant = state
        .registry
        .get(&tenant_uri)
        .await
        .map_err(ApiError::from)?;
    let local = state.registry.local();
    let tenant_is_local = state.registry.is_local(&tenant_uri);

    let mut documents: Vec<Value> = Vec::new();
    let mut failed: Vec<Value> = Vec::new();
    let total_count = input.files.len();
    let topic_name = input.topic_name;

    for (file, link) in input.files.into_iter().zip(input.links.into_iter()) {
        let file_name = required_file_name(&file)?;

        let file_path =
            match save_uploaded_file(&state.upload_dir, &topic_name, &file_name, &file) {
                Ok(path) => path,
                Err(err) => {
                    warn!(file = %file_name, error = %err, "failed to persist upload");
                    failed.push(json!({"file": file_name, "link": link, "reason": err.to_string()}));
                    continue;
                }
            };

        let attributes = json!({
            "doc_link": link.clone(),
            "topic_name": topic_name.clone(),
        });
        let record = match state.ingestor.ingest(&tenant, &file_path, attributes).await {
            Ok(record) => record,
            Err(err) => {
                warn!(file = %file_name, link = %link, error = %err, "ingestion failed");
                failed.push(json!({"file": file_name, "link": link, "reason": err.to_string()}));
                continue;
            }
        };

        // Tenant-first: the user-visible row, then the scheduler's mirror.
        if let Err(err) =
            GraphBuildStatus::enqueue(&topic_name, &record.source_id, "", &tenant).await
        {
            failed.push(json!({"file": file_name, "link": link, "reason": err.to_string()}));
            continue;
        }
        if !tenant_is_local {
            if let Err(err) = GraphBuildStatus::enqueue(
                &topic_name,
                &record.source_id,
                &tenant_uri,
                &local,
            )
            .await
            {
                // The tenant row exists but the scheduler cannot see the task
                // yet; the client retries under the same link.
                warn!(file = %file_name, error = %err, "local mirror row missing, client must retry");
                failed.push(json!({
                    "file": file_name,
                    "link": link,
                    "reason": format!("task not scheduled, retry the upload: {err}"),
                }));
                continue;
            }
        }

        info!(file = %file_name, link = %link, source_id = %record.source_id, "document queued for graph build");
        documents.push(json!({
            "id": record.source_id,
            "name": record.name,
            "file_path": file_path.to_string_lossy(),
            "doc_link": record.link,
            "file_type": file_type_label(&file_name),
            "status": "processed",
        }));
    }

    let uploaded_count = documents.len();
    let body = json!({
        "status": if uploaded_count > 0 { "success" } else { "error" },
        "message": format!("Batch upload completed: {uploaded_count}/{total_count} documents processed successfully"),
        "data": {
            "uploaded_count": uploaded_count,
            "total_count": total_count,
            "documents": documents,
            "failed": failed,
            "success_rate": uploaded_count as f64 / total_count as f64,
        },
    });

    let status = if uploaded_count == 0 {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    Ok((status, Json(body)))
}

fn required_file_name(file: &FieldData<NamedTempFile>) -> Result<String, ApiError> {
    file.metadata
        .file_name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::ValidationError("File must have a filename".into()))
}

/// Files land at `UPLOAD_DIR/<topic>/<filename>/<filename>`; the doubled
/// directory keeps per-file siblings (notes, derived artifacts) together.
fn save_uploaded_file(
    upload_dir: &Path,
    topic_name: &str,
    file_name: &str,
    file: &FieldData<NamedTempFile>,
) -> Result<PathBuf, std::io::Error> {
    let file_dir = upload_dir.join(topic_name).join(file_name);
    let file_path = file_dir.join(file_name);
    if file_path.exists() {
        return Ok(file_path);
    }

    std::fs::create_dir_all(&file_dir)?;
    std::fs::copy(file.contents.path(), &file_path)?;
    Ok(file_path)
}

fn file_type_label(file_name: &str) -> &'static str {
    match Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
        .as_str()
    {
        "pdf" => "pdf",
        "md" | "markdown" => "markdown",
        "txt" => "document",
        "sql" => "sql",
        _ => "unknown",
    }
}
