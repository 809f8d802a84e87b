//! Optimizer integration tests: in-memory SurrealDB, scripted models,
//! hashed embeddings, tempdir-backed state files.

use std::sync::Arc;

use common::{
    storage::{
        db::SurrealDbClient,
        types::{
            graph_entity::GraphEntity,
            graph_relationship::GraphRelationship,
            source_graph_mapping::{GraphElementType, SourceGraphMapping},
        },
    },
    utils::{embedding::EmbeddingProvider, llm::{LanguageModel, ScriptedModel}},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    config::{OptimizationConfig, ProcessingConfig},
    engine::GraphOptimizer,
    issue::{Issue, IssueState, IssueType, CRITIC_VOTE_WEIGHT},
};

const CRITIC_YES: &str = "```json\n{\"is_valid\": true, \"critique\": \"the issue is real\"}\n```";

async fn memory_db() -> Arc<SurrealDbClient> {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("Failed to start in-memory surrealdb");
    db.ensure_initialized(8).await.expect("schema init");
    Arc::new(db)
}

fn config(dir: &tempfile::TempDir) -> OptimizationConfig {
    OptimizationConfig {
        processing: ProcessingConfig {
            max_concurrent_issues: 2,
            confidence_threshold: 0.9,
            similarity_threshold: -1.0,
            top_k: 10,
            state_file_path: dir.path().join("state.json"),
            max_retries: 3,
        },
    }
}

async fn seed_entity(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    id: &str,
    name: &str,
    description: &str,
) -> GraphEntity {
    let embedding = embedder.embed(description).await.expect("embed");
    let mut entity = GraphEntity::new(
        name.into(),
        description.into(),
        embedding,
        json!({"topic_name": "demo", "category": "narrative"}),
    );
    entity.id = id.to_string();
    db.store_item(entity.clone()).await.expect("store entity");
    entity
}

async fn seed_relationship(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    src: &str,
    tgt: &str,
    desc: &str,
) -> GraphRelationship {
    let embedding = embedder.embed(desc).await.expect("embed");
    let relationship = GraphRelationship::new(
        src.into(),
        tgt.into(),
        desc.into(),
        embedding,
        json!({"topic_name": "demo", "category": "narrative", "confidence": "medium"}),
    );
    db.store_item(relationship.clone())
        .await
        .expect("store relationship");
    relationship
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redundant_relationships_merge_with_mapping_repair() {
    let db = memory_db().await;
    let embedder = Arc::new(EmbeddingProvider::new_hashed(8));
    let dir = tempfile::tempdir().expect("tempdir");

    seed_entity(&db, &embedder, "e1", "Acme", "an industrial conglomerate").await;
    seed_entity(&db, &embedder, "e2", "Initech", "a software firm").await;
    let rel_a = seed_relationship(&db, &embedder, "e1", "e2", "acme acquired initech").await;
    let rel_b = seed_relationship(&db, &embedder, "e1", "e2", "acme bought initech").await;

    for rel in [&rel_a, &rel_b] {
        SourceGraphMapping::ensure("s1", &rel.id, GraphElementType::Relationship, "demo", &db)
            .await
            .expect("mapping");
    }

    let detection_response = format!(
        "```json\n[{{\"issue_type\": \"redundancy_relationship\", \"affected_ids\": [\"{}\", \"{}\"], \"reasoning\": \"same acquisition stated twice\"}}]\n```",
        rel_a.id, rel_b.id
    );
    let llm: Arc<dyn LanguageModel> = Arc::new(
        ScriptedModel::new()
            .route("Identify quality issues", detection_response)
            .route(
                "consolidating redundant relationship information",
                "```json\n{\"source_entity_id\": \"e1\", \"target_entity_id\": \"e2\", \"description\": \"Acme acquired Initech in March 2024\"}\n```",
            ),
    );
    let critic: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().fallback(CRITIC_YES));

    let optimizer = GraphOptimizer::new(
        Arc::clone(&db),
        llm,
        vec![("critic-1".into(), critic)],
        Arc::clone(&embedder),
        config(&dir),
    );

    let report = optimizer.run("acquisitions").await.expect("first run");
    assert_eq!(report.detected, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);

    // One merged relationship remains, the originals are gone.
    let relationships: Vec<GraphRelationship> =
        db.get_all_stored_items().await.expect("relationships");
    assert_eq!(relationships.len(), 1);
    let merged = &relationships[0];
    assert_ne!(merged.id, rel_a.id);
    assert_ne!(merged.id, rel_b.id);
    assert_eq!(merged.source_entity_id, "e1");
    assert_eq!(merged.target_entity_id, "e2");
    assert_eq!(merged.relationship_desc, "Acme acquired Initech in March 2024");

    // Lineage rows were repointed, never deleted.
    let mappings: Vec<SourceGraphMapping> = db.get_all_stored_items().await.expect("mappings");
    assert_eq!(mappings.len(), 2);
    assert!(mappings
        .iter()
        .all(|mapping| mapping.graph_element_id == merged.id));

    // State: resolved, score bounded by the number of critics.
    let state = IssueState::load(&dir.path().join("state.json")).expect("state");
    assert_eq!(state.issues.len(), 1);
    assert!(state.issues[0].is_resolved);
    assert!(state.issues[0].validation_score <= CRITIC_VOTE_WEIGHT * 1.0 + f64::EPSILON);

    // A second run with nothing new is a no-op on the graph.
    let report = optimizer.run("acquisitions").await.expect("second run");
    assert_eq!(report.detected, 0);
    assert_eq!(report.processed, 0);
    let after: Vec<GraphRelationship> = db.get_all_stored_items().await.expect("relationships");
    assert_eq!(after.len(), 1);
    let state = IssueState::load(&dir.path().join("state.json")).expect("state");
    assert_eq!(state.issues.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redundant_entities_merge_with_reference_repair() {
    let db = memory_db().await;
    let embedder = Arc::new(EmbeddingProvider::new_hashed(8));
    let dir = tempfile::tempdir().expect("tempdir");

    seed_entity(&db, &embedder, "e1", "Acme", "an industrial conglomerate").await;
    seed_entity(&db, &embedder, "e2", "Acme Corp", "the same conglomerate").await;
    seed_entity(&db, &embedder, "e3", "Initech", "a software firm").await;
    seed_relationship(&db, &embedder, "e1", "e3", "acme acquired initech").await;
    seed_relationship(&db, &embedder, "e3", "e2", "initech reports to acme corp").await;
    for entity_id in ["e1", "e2"] {
        SourceGraphMapping::ensure("s1", entity_id, GraphElementType::Entity, "demo", &db)
            .await
            .expect("mapping");
    }

    // Pre-seeded, unevaluated issue: detection stays gated, critics run.
    let mut state = IssueState::default();
    state.insert_new(Issue::new(
        IssueType::RedundancyEntity,
        vec!["e1".into(), "e2".into()],
        "Acme and Acme Corp are the same organization".into(),
        json!({}),
    ));
    state
        .save(&dir.path().join("state.json"))
        .expect("seed state");

    let llm: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().route(
        "consolidating redundant entity information",
        "```json\n{\"name\": \"Acme\", \"description\": \"Acme, the industrial conglomerate also known as Acme Corp\", \"attributes\": {\"aliases\": [\"Acme Corp\"]}}\n```",
    ));
    let critic: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().fallback(CRITIC_YES));

    let optimizer = GraphOptimizer::new(
        Arc::clone(&db),
        llm,
        vec![("critic-1".into(), critic)],
        Arc::clone(&embedder),
        config(&dir),
    );
    let report = optimizer.run("organizations").await.expect("run");
    assert_eq!(report.detected, 0, "detection must stay gated");
    assert_eq!(report.processed, 1);

    // The merged entity exists; the originals are gone; Initech survives.
    let entities: Vec<GraphEntity> = db.get_all_stored_items().await.expect("entities");
    assert_eq!(entities.len(), 2);
    let merged = entities
        .iter()
        .find(|entity| entity.name == "Acme")
        .expect("merged entity");
    assert!(merged.aliases().contains(&"Acme Corp".to_string()));
    assert_eq!(merged.topic_name(), Some("demo"));
    assert!(db
        .get_item::<GraphEntity>("e1")
        .await
        .expect("lookup")
        .is_none());
    assert!(db
        .get_item::<GraphEntity>("e2")
        .await
        .expect("lookup")
        .is_none());

    // Reference repair completeness: nothing points at the removed ids.
    let relationships: Vec<GraphRelationship> =
        db.get_all_stored_items().await.expect("relationships");
    assert_eq!(relationships.len(), 2);
    for relationship in &relationships {
        assert!(!["e1", "e2"].contains(&relationship.source_entity_id.as_str()));
        assert!(!["e1", "e2"].contains(&relationship.target_entity_id.as_str()));
        assert!(
            relationship.source_entity_id == merged.id
                || relationship.target_entity_id == merged.id
        );
    }

    // Entity lineage rows now point at the merged id.
    let mappings: Vec<SourceGraphMapping> = db.get_all_stored_items().await.expect("mappings");
    assert_eq!(mappings.len(), 2);
    assert!(mappings
        .iter()
        .all(|mapping| mapping.graph_element_id == merged.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entity_refinement_preserves_topic_and_category() {
    let db = memory_db().await;
    let embedder = Arc::new(EmbeddingProvider::new_hashed(8));
    let dir = tempfile::tempdir().expect("tempdir");

    seed_entity(&db, &embedder, "e1", "System", "Manages data processing").await;

    let mut state = IssueState::default();
    state.insert_new(Issue::new(
        IssueType::EntityQualityIssue,
        vec!["e1".into()],
        "description is fundamentally vague".into(),
        json!({}),
    ));
    state
        .save(&dir.path().join("state.json"))
        .expect("seed state");

    let llm: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().route(
        "rectifying quality issues within a single entity",
        "```json\n{\"name\": \"Billing System\", \"description\": \"The billing system that settles tenant invoices nightly\", \"attributes\": {\"topic_name\": \"hijacked\", \"entity_type\": \"System\"}}\n```",
    ));
    let critic: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().fallback(CRITIC_YES));

    let optimizer = GraphOptimizer::new(
        Arc::clone(&db),
        llm,
        vec![("critic-1".into(), critic)],
        Arc::clone(&embedder),
        config(&dir),
    );
    let report = optimizer.run("systems").await.expect("run");
    assert_eq!(report.processed, 1);

    let refined: GraphEntity = db
        .get_item("e1")
        .await
        .expect("fetch")
        .expect("entity still present");
    assert_eq!(refined.name, "Billing System");
    assert!(refined.description.contains("settles tenant invoices"));
    // Identity attributes survive even a hostile refinement payload.
    assert_eq!(refined.topic_name(), Some("demo"));
    assert_eq!(refined.category(), Some("narrative"));
    assert_eq!(
        refined.attributes.get("entity_type"),
        Some(&json!("System"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_rows_are_skipped_not_failed() {
    let db = memory_db().await;
    let embedder = Arc::new(EmbeddingProvider::new_hashed(8));
    let dir = tempfile::tempdir().expect("tempdir");

    // The referenced relationships were already consumed by an earlier merge.
    let mut state = IssueState::default();
    state.insert_new(Issue::new(
        IssueType::RedundancyRelationship,
        vec!["gone-1".into(), "gone-2".into()],
        "stale issue".into(),
        json!({}),
    ));
    state
        .save(&dir.path().join("state.json"))
        .expect("seed state");

    let llm: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().fallback("[]"));
    let critic: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().fallback(CRITIC_YES));

    let optimizer = GraphOptimizer::new(
        Arc::clone(&db),
        llm,
        vec![("critic-1".into(), critic)],
        Arc::clone(&embedder),
        config(&dir),
    );
    let report = optimizer.run("anything").await.expect("run");
    assert_eq!(report.processed, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);

    let state = IssueState::load(&dir.path().join("state.json")).expect("state");
    assert!(state.issues[0].is_resolved);
}
