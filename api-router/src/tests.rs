//! HTTP surface tests: real router, in-memory store, scripted LLM.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{
    storage::{
        db::SurrealDbClient,
        registry::StoreRegistry,
        types::{
            content_store::ContentStore,
            graph_build_status::{BuildStatus, GraphBuildStatus},
            source_data::SourceData,
        },
    },
    utils::{embedding::EmbeddingProvider, llm::ScriptedModel},
};
use graph_pipeline::ingest::KnowledgeIngestor;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use crate::{api_routes_v1, api_state::ApiState};

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

async fn build_test_app() -> (Router, Arc<SurrealDbClient>, tempfile::TempDir) {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb"),
    );
    db.ensure_initialized(8).await.expect("schema init");

    let registry = Arc::new(StoreRegistry::with_local(Arc::clone(&db), 8));
    let ingestor = Arc::new(KnowledgeIngestor::new(
        Arc::new(ScriptedModel::new().fallback("a situating sentence")),
        Arc::new(EmbeddingProvider::new_hashed(8)),
    ));

    let data_dir = tempfile::tempdir().expect("tempdir");
    let state = ApiState::new(registry, ingestor, data_dir.path().join("uploads"));

    let app = Router::new()
        .nest("/api/v1", api_routes_v1())
        .with_state(state);
    (app, db, data_dir)
}

fn push_text_field(body: &mut Vec<u8>, name: &str, value: &str) {
    body.extend_from_slice(
        format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
            .as_bytes(),
    );
}

fn multipart_body(
    files: &[(&str, &[u8])],
    links: &[&str],
    topic_name: &str,
    database_uri: Option<&str>,
) -> Vec<u8> {
    let mut body = Vec::new();
    for (file_name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    for link in links {
        push_text_field(&mut body, "links", link);
    }
    push_text_field(&mut body, "topic_name", topic_name);
    if let Some(uri) = database_uri {
        push_text_field(&mut body, "database_uri", uri);
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn post_upload(app: &Router, body: Vec<u8>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/knowledge/upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_queues_a_pending_build_and_lists_it() {
    let (app, db, _dir) = build_test_app().await;

    let body = multipart_body(
        &[("docA.md", b"# Acme\n\nAcme acquired Initech.")],
        &["https://example.com/docA"],
        "demo",
        None,
    );
    let (status, response) = post_upload(&app, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["data"]["uploaded_count"], 1);
    assert_eq!(response["data"]["total_count"], 1);
    assert!(response["data"]["failed"]
        .as_array()
        .expect("failed list")
        .is_empty());

    let sources: Vec<SourceData> = db.get_all_stored_items().await.expect("sources");
    assert_eq!(sources.len(), 1);

    let statuses: Vec<GraphBuildStatus> = db.get_all_stored_items().await.expect("statuses");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, BuildStatus::Pending);
    assert_eq!(statuses[0].topic_name, "demo");
    assert_eq!(statuses[0].external_database_uri, "");

    // The topics listing reflects the pending document.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/knowledge/topics")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("topics response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let listing: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(listing["data"]["total_topics"], 1);
    assert_eq!(listing["data"]["topics"][0]["topic_name"], "demo");
    assert_eq!(listing["data"]["topics"][0]["pending_count"], 1);
    assert_eq!(listing["data"]["topics"][0]["completed_count"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_shape_violations_reject_the_whole_request() {
    let (app, _db, _dir) = build_test_app().await;

    // No files at all.
    let (status, _) = post_upload(&app, multipart_body(&[], &[], "demo", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // files.len() != links.len()
    let (status, _) = post_upload(
        &app,
        multipart_body(&[("a.md", b"one")], &["l1", "l2"], "demo", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Duplicate links.
    let (status, _) = post_upload(
        &app,
        multipart_body(
            &[("a.md", b"one"), ("b.md", b"two")],
            &["same", "same"],
            "demo",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Disallowed extension.
    let (status, _) = post_upload(
        &app,
        multipart_body(&[("a.docx", b"bytes")], &["l1"], "demo", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_size_boundary_is_exact() {
    let (app, _db, _dir) = build_test_app().await;
    let limit = 10 * 1024 * 1024;

    let exactly_limit = vec![b'x'; limit];
    let (status, response) = post_upload(
        &app,
        multipart_body(&[("exact.txt", &exactly_limit)], &["l-exact"], "demo", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["data"]["uploaded_count"], 1);

    let over_limit = vec![b'x'; limit + 1];
    let (status, _) = post_upload(
        &app,
        multipart_body(&[("over.txt", &over_limit)], &["l-over"], "demo", None),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reupload_reuses_source_and_content_rows() {
    let (app, db, _dir) = build_test_app().await;
    let content: &[u8] = b"# Stable bytes";

    for _ in 0..2 {
        let (status, _) = post_upload(
            &app,
            multipart_body(&[("docA.md", content)], &["link-1"], "demo", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let sources: Vec<SourceData> = db.get_all_stored_items().await.expect("sources");
    let contents: Vec<ContentStore> = db.get_all_stored_items().await.expect("contents");
    assert_eq!(sources.len(), 1, "same link reuses the source row");
    assert_eq!(contents.len(), 1);

    // Same bytes under a new link: a second source, one content row.
    let (status, _) = post_upload(
        &app,
        multipart_body(&[("docA.md", content)], &["link-2"], "demo", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let sources: Vec<SourceData> = db.get_all_stored_items().await.expect("sources");
    let contents: Vec<ContentStore> = db.get_all_stored_items().await.expect("contents");
    assert_eq!(sources.len(), 2);
    assert_eq!(contents.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn probes_answer() {
    let (app, _db, _dir) = build_test_app().await;

    for uri in ["/api/v1/live", "/api/v1/ready"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("probe response");
        assert_eq!(response.status(), StatusCode::OK, "probe {uri}");
    }
}
