use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            graph_entity::GraphEntity,
            graph_relationship::{Confidence, GraphRelationship, Sentiment},
            source_graph_mapping::{GraphElementType, SourceGraphMapping},
        },
    },
    utils::embedding::EmbeddingProvider,
};
use serde_json::{Map, Value};
use tokio::time::{sleep, Duration};
use tracing::warn;

use super::{triplets::Triplet, BuildConfig};

pub(crate) const NARRATIVE_CATEGORY: &str = "narrative";

#[derive(Debug, Default)]
pub(crate) struct MaterializeOutcome {
    pub entities_created: usize,
    pub relationship_created: bool,
}

/// Write one triplet to the tenant store, retrying connection losses with a
/// fixed 1-second spacing. Every step is a lookup-or-create, so a retry after
/// partial work converges instead of duplicating.
pub(crate) async fn materialize_triplet_with_retry(
    store: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    config: &BuildConfig,
    topic_name: &str,
    source_id: &str,
    triplet: &Triplet,
    entity_cache: &mut HashMap<String, String>,
) -> Result<MaterializeOutcome, AppError> {
    let mut attempt: u32 = 0;
    loop {
        match materialize_triplet(store, embedder, topic_name, source_id, triplet, entity_cache)
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(err)
                if err.is_connection_lost()
                    && attempt + 1 < config.connection_retry_attempts.max(1) =>
            {
                attempt += 1;
                warn!(attempt, error = %err, "store connection lost, retrying triplet");
                sleep(Duration::from_millis(config.connection_retry_delay_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn materialize_triplet(
    store: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    topic_name: &str,
    source_id: &str,
    triplet: &Triplet,
    entity_cache: &mut HashMap<String, String>,
) -> Result<MaterializeOutcome, AppError> {
    let mut outcome = MaterializeOutcome::default();

    let (subject_id, subject_created) = resolve_entity(
        store,
        embedder,
        entity_cache,
        topic_name,
        &triplet.subject.name,
        &triplet.subject.description,
        &triplet.subject.attributes,
    )
    .await?;
    if subject_created {
        outcome.entities_created += 1;
    }
    SourceGraphMapping::ensure(
        source_id,
        &subject_id,
        GraphElementType::Entity,
        topic_name,
        store,
    )
    .await?;

    let (object_id, object_created) = resolve_entity(
        store,
        embedder,
        entity_cache,
        topic_name,
        &triplet.object.name,
        &triplet.object.description,
        &triplet.object.attributes,
    )
    .await?;
    if object_created {
        outcome.entities_created += 1;
    }
    SourceGraphMapping::ensure(
        source_id,
        &object_id,
        GraphElementType::Entity,
        topic_name,
        store,
    )
    .await?;

    let relationship_desc = triplet.predicate.as_str();
    let relationship_id = match GraphRelationship::find_by_identity(
        &subject_id,
        &object_id,
        relationship_desc,
        store,
    )
    .await?
    {
        Some(existing) => existing.id,
        None => {
            let attributes =
                relationship_attributes(topic_name, &triplet.relationship_attributes);
            let embedding = embedder.embed(relationship_desc).await?;
            let relationship = GraphRelationship::new(
                subject_id.clone(),
                object_id.clone(),
                relationship_desc.to_string(),
                embedding,
                attributes,
            );
            let stored = store
                .store_item(relationship)
                .await?
                .ok_or_else(|| AppError::Build("relationship row was not created".into()))?;
            outcome.relationship_created = true;
            stored.id
        }
    };

    SourceGraphMapping::ensure(
        source_id,
        &relationship_id,
        GraphElementType::Relationship,
        topic_name,
        store,
    )
    .await?;

    Ok(outcome)
}

/// Resolve an entity by `(name, topic)`: the per-build cache first, the store
/// second, a fresh row last. Returns `(id, created)`.
pub(crate) async fn resolve_entity(
    store: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    entity_cache: &mut HashMap<String, String>,
    topic_name: &str,
    name: &str,
    description: &str,
    attributes: &Map<String, Value>,
) -> Result<(String, bool), AppError> {
    if let Some(id) = entity_cache.get(name) {
        return Ok((id.clone(), false));
    }

    if let Some(existing) = GraphEntity::find_by_name_and_topic(name, topic_name, store).await? {
        entity_cache.insert(name.to_string(), existing.id.clone());
        return Ok((existing.id, false));
    }

    let embedding_input = if description.is_empty() { name } else { description };
    let embedding = embedder.embed(embedding_input).await?;
    let entity = GraphEntity::new(
        name.to_string(),
        description.to_string(),
        embedding,
        entity_attributes(topic_name, attributes),
    );
    let stored = store
        .store_item(entity)
        .await?
        .ok_or_else(|| AppError::Build("entity row was not created".into()))?;

    entity_cache.insert(name.to_string(), stored.id.clone());
    Ok((stored.id, true))
}

/// Extraction attributes merged with the keys every entity must carry.
pub(crate) fn entity_attributes(topic_name: &str, extracted: &Map<String, Value>) -> Value {
    let mut attributes = extracted.clone();
    attributes.insert("topic_name".into(), Value::String(topic_name.to_string()));
    attributes.insert(
        "category".into(),
        Value::String(NARRATIVE_CATEGORY.to_string()),
    );
    Value::Object(attributes)
}

/// Relationship attributes with the closed vocabularies normalized; unknown
/// sentiment/confidence values collapse to their defaults.
pub(crate) fn relationship_attributes(topic_name: &str, extracted: &Map<String, Value>) -> Value {
    let mut attributes = extracted.clone();

    let sentiment = attributes
        .get("sentiment")
        .and_then(|v| v.as_str())
        .map_or(Sentiment::Neutral, Sentiment::parse);
    attributes.insert(
        "sentiment".into(),
        Value::String(sentiment.as_str().to_string()),
    );

    let confidence = attributes
        .get("confidence")
        .and_then(|v| v.as_str())
        .map_or(Confidence::Medium, Confidence::parse);
    attributes.insert(
        "confidence".into(),
        Value::String(confidence.as_str().to_string()),
    );

    attributes.insert("topic_name".into(), Value::String(topic_name.to_string()));
    attributes.insert(
        "category".into(),
        Value::String(NARRATIVE_CATEGORY.to_string()),
    );
    Value::Object(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relationship_attributes_normalize_closed_vocabularies() {
        let mut extracted = Map::new();
        extracted.insert("sentiment".into(), json!("POSITIVE"));
        extracted.insert("confidence".into(), json!("who knows"));
        extracted.insert("fact_time".into(), json!("2024-03-15"));

        let attributes = relationship_attributes("demo", &extracted);
        assert_eq!(attributes["sentiment"], json!("positive"));
        assert_eq!(attributes["confidence"], json!("medium"));
        assert_eq!(attributes["fact_time"], json!("2024-03-15"));
        assert_eq!(attributes["topic_name"], json!("demo"));
        assert_eq!(attributes["category"], json!("narrative"));
    }

    #[test]
    fn entity_attributes_always_carry_topic_and_category() {
        let mut extracted = Map::new();
        extracted.insert("entity_type".into(), json!("Organization"));

        let attributes = entity_attributes("demo", &extracted);
        assert_eq!(attributes["entity_type"], json!("Organization"));
        assert_eq!(attributes["topic_name"], json!("demo"));
        assert_eq!(attributes["category"], json!("narrative"));
    }
}
