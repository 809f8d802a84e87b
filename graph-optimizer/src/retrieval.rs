use std::collections::HashSet;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            graph_entity::GraphEntity,
            graph_relationship::GraphRelationship,
            source_data::SourceData,
            source_graph_mapping::{GraphElementType, SourceGraphMapping},
        },
    },
    utils::embedding::EmbeddingProvider,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// The slice of the graph a detection pass looks at.
#[derive(Debug, Default)]
pub struct GraphSnapshot {
    pub entities: Vec<GraphEntity>,
    pub relationships: Vec<GraphRelationship>,
}

impl GraphSnapshot {
    /// JSON view for prompts: embeddings stripped, ids kept.
    pub fn to_json(&self) -> Value {
        json!({
            "entities": self.entities.iter().map(|entity| json!({
                "id": entity.id,
                "name": entity.name,
                "description": entity.description,
                "attributes": entity.attributes,
            })).collect::<Vec<_>>(),
            "relationships": self.relationships.iter().map(|relationship| json!({
                "id": relationship.id,
                "source_entity_id": relationship.source_entity_id,
                "target_entity_id": relationship.target_entity_id,
                "relationship_desc": relationship.relationship_desc,
                "attributes": relationship.attributes,
            })).collect::<Vec<_>>(),
        })
    }
}

/// Vector similarity retrieval over relationship descriptions; entities are
/// pulled in as the endpoints of whatever matched.
pub struct VectorSearchGraphProvider {
    pub top_k: usize,
    pub similarity_threshold: f32,
}

impl VectorSearchGraphProvider {
    pub fn new(top_k: usize, similarity_threshold: f32) -> Self {
        Self {
            top_k,
            similarity_threshold,
        }
    }

    #[instrument(skip_all, fields(top_k = self.top_k))]
    pub async fn retrieve(
        &self,
        query: &str,
        embedder: &EmbeddingProvider,
        store: &SurrealDbClient,
    ) -> Result<GraphSnapshot, AppError> {
        #[derive(Deserialize)]
        struct Hit {
            id: surrealdb::sql::Thing,
            score: f32,
        }

        let embedding = embedder.embed(query).await?;

        let sql = format!(
            "SELECT id, vector::similarity::cosine(desc_embedding, $embedding) AS score
             FROM graph_relationship
             WHERE desc_embedding <|{k},100|> $embedding
             ORDER BY score DESC",
            k = self.top_k.max(1),
        );
        let mut response = store.query(sql).bind(("embedding", embedding)).await?;
        let hits: Vec<Hit> = response.take(0)?;

        let matched_ids: Vec<String> = hits
            .iter()
            .filter(|hit| hit.score >= self.similarity_threshold)
            .map(|hit| hit.id.id.to_raw())
            .collect();
        debug!(
            candidates = hits.len(),
            matched = matched_ids.len(),
            "relationship similarity search finished"
        );

        let relationships = GraphRelationship::fetch_by_ids(&matched_ids, store).await?;

        let mut entity_ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for relationship in &relationships {
            for id in [
                relationship.source_entity_id.clone(),
                relationship.target_entity_id.clone(),
            ] {
                if seen.insert(id.clone()) {
                    entity_ids.push(id);
                }
            }
        }
        let entities = GraphEntity::fetch_by_ids(&entity_ids, store).await?;

        Ok(GraphSnapshot {
            entities,
            relationships,
        })
    }
}

/// Source text pulled in as resolver context.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub source_id: String,
    pub name: String,
    pub content: String,
}

/// The source documents that contributed any of the given graph elements,
/// resolved through the lineage mappings.
pub async fn source_texts_for_elements(
    element_ids: Vec<String>,
    element_type: GraphElementType,
    store: &SurrealDbClient,
) -> Result<Vec<SourceText>, AppError> {
    let mappings = SourceGraphMapping::for_elements(element_ids, element_type, store).await?;

    let mut source_ids: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for mapping in mappings {
        if seen.insert(mapping.source_id.clone()) {
            source_ids.push(mapping.source_id);
        }
    }

    let mut texts = Vec::with_capacity(source_ids.len());
    for source_id in source_ids {
        let Some(source) = store.get_item::<SourceData>(&source_id).await? else {
            continue;
        };
        if let Some(content) = source.effective_content(store).await? {
            texts.push(SourceText {
                source_id: source.id,
                name: source.name,
                content,
            });
        }
    }
    Ok(texts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(8).await.expect("schema init");
        db
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
            json!({"topic_name": "demo"}),
        );
        db.store_item(relationship.clone())
            .await
            .expect("store relationship");
        relationship
    }

    #[tokio::test]
    async fn retrieval_returns_matches_with_their_endpoints() {
        let db = memory_db().await;
        let embedder = EmbeddingProvider::new_hashed(8);

        for (id, name) in [("e1", "Acme"), ("e2", "Initech")] {
            let embedding = embedder.embed(name).await.expect("embed");
            let mut entity =
                GraphEntity::new(name.into(), format!("{name} inc"), embedding, json!({}));
            entity.id = id.to_string();
            db.store_item(entity).await.expect("store entity");
        }
        seed_relationship(&db, &embedder, "e1", "e2", "acme acquired initech").await;

        let provider = VectorSearchGraphProvider::new(10, -1.0);
        let snapshot = provider
            .retrieve("acme acquired initech", &embedder, &db)
            .await
            .expect("retrieve");

        assert_eq!(snapshot.relationships.len(), 1);
        assert_eq!(snapshot.entities.len(), 2);

        let rendered = snapshot.to_json();
        assert!(rendered["relationships"][0]["relationship_desc"]
            .as_str()
            .expect("desc present")
            .contains("acquired"));
        // Embeddings never reach the prompt.
        assert!(rendered["relationships"][0].get("desc_embedding").is_none());
    }

    #[tokio::test]
    async fn source_texts_follow_the_lineage_mappings() {
        let db = memory_db().await;

        let body = "Acme acquired Initech.";
        let hash = common::storage::types::content_store::ContentStore::hash_bytes(body.as_bytes());
        db.store_item(common::storage::types::content_store::ContentStore::new(
            hash.clone(),
            "docA".into(),
            "link".into(),
            body.into(),
            body.len() as u64,
            "text/plain".into(),
        ))
        .await
        .expect("store content");
        let source = SourceData::new(
            "docA".into(),
            "link".into(),
            "text/plain".into(),
            hash,
            json!({}),
        );
        let source = db
            .store_item(source)
            .await
            .expect("store source")
            .expect("created");

        SourceGraphMapping::ensure(&source.id, "ent-1", GraphElementType::Entity, "demo", &db)
            .await
            .expect("mapping");

        let texts =
            source_texts_for_elements(vec!["ent-1".into()], GraphElementType::Entity, &db)
                .await
                .expect("texts");
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].content, body);

        let none =
            source_texts_for_elements(vec!["ent-1".into()], GraphElementType::Relationship, &db)
                .await
                .expect("texts");
        assert!(none.is_empty());
    }
}
