use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            graph_entity::GraphEntity,
            graph_relationship::GraphRelationship,
            source_data::SourceDocument,
            source_graph_mapping::{GraphElementType, SourceGraphMapping},
        },
    },
    utils::{
        embedding::EmbeddingProvider,
        json::{parse_llm_json, JsonShape},
        llm::LanguageModel,
    },
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::prompts;

use super::{
    map_guard_error, materialize,
    state::{BuildMachine, Enhanced, Extracted},
    BuildConfig, BuildContext,
};

#[derive(Debug, Clone, Deserialize)]
struct EnhancedNode {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    requires_description_update: bool,
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct EnhancedRelationship {
    subject: EnhancedNode,
    predicate: String,
    object: EnhancedNode,
    #[serde(default)]
    relationship_attributes: Map<String, Value>,
}

/// Stage 5: reasoning pass over each document's freshly-built subgraph.
#[instrument(level = "trace", skip_all, fields(topic = %ctx.topic_name))]
pub(crate) async fn enhance_documents(
    machine: BuildMachine<(), Extracted>,
    ctx: &mut BuildContext<'_>,
) -> Result<BuildMachine<(), Enhanced>, AppError> {
    for document in ctx.documents {
        let (entities, relationships) = enhance_single(
            ctx.store,
            ctx.llm,
            ctx.embedder,
            ctx.config,
            ctx.topic_name,
            document,
        )
        .await?;
        ctx.report.entities_enhanced += entities;
        ctx.report.relationships_enhanced += relationships;
    }

    machine
        .enhance()
        .map_err(|(_, guard)| map_guard_error("enhance", &guard))
}

/// One reasoning pass for `(source, topic)`: query the subgraph this source
/// contributed, ask the model for inferred relationships and description
/// upgrades, and materialize the result. Safe to re-run after corrections.
pub(crate) async fn enhance_single(
    store: &SurrealDbClient,
    llm: &dyn LanguageModel,
    embedder: &EmbeddingProvider,
    config: &BuildConfig,
    topic_name: &str,
    document: &SourceDocument,
) -> Result<(usize, usize), AppError> {
    let mappings =
        SourceGraphMapping::for_source_and_topic(&document.source_id, topic_name, store).await?;
    if mappings.is_empty() {
        debug!(source_id = %document.source_id, "no subgraph for source, skipping reasoning pass");
        return Ok((0, 0));
    }

    let mut entity_ids = Vec::new();
    let mut relationship_ids = Vec::new();
    for mapping in &mappings {
        match mapping.graph_element_type {
            GraphElementType::Entity => entity_ids.push(mapping.graph_element_id.clone()),
            GraphElementType::Relationship => {
                relationship_ids.push(mapping.graph_element_id.clone());
            }
        }
    }

    let entities = GraphEntity::fetch_by_ids(&entity_ids, store).await?;
    let relationships = GraphRelationship::fetch_by_ids(&relationship_ids, store).await?;
    let context = reasoning_context(&entities, &relationships);

    let prompt = prompts::reasoning_enhancement_prompt(topic_name, &context, document);
    let response = llm.generate(&prompt, config.enhancement_max_tokens).await?;
    let value = parse_llm_json(llm, &response, JsonShape::Object).await?;

    let Some(items) = value
        .get("enhanced_relationships")
        .and_then(Value::as_array)
    else {
        debug!(source_id = %document.source_id, "no enhanced relationships proposed");
        return Ok((0, 0));
    };

    let mut entities_enhanced = 0;
    let mut relationships_enhanced = 0;

    for item in items {
        let enhanced: EnhancedRelationship = match serde_json::from_value(item.clone()) {
            Ok(enhanced) => enhanced,
            Err(err) => {
                warn!(error = %err, "malformed enhanced relationship dropped");
                continue;
            }
        };
        if enhanced.subject.name.is_empty() || enhanced.object.name.is_empty() {
            continue;
        }

        let (subject_id, subject_touched) =
            resolve_enhanced_entity(store, embedder, topic_name, &enhanced.subject).await?;
        if subject_touched {
            entities_enhanced += 1;
        }
        SourceGraphMapping::ensure(
            &document.source_id,
            &subject_id,
            GraphElementType::Entity,
            topic_name,
            store,
        )
        .await?;

        let (object_id, object_touched) =
            resolve_enhanced_entity(store, embedder, topic_name, &enhanced.object).await?;
        if object_touched {
            entities_enhanced += 1;
        }
        SourceGraphMapping::ensure(
            &document.source_id,
            &object_id,
            GraphElementType::Entity,
            topic_name,
            store,
        )
        .await?;

        let attributes =
            materialize::relationship_attributes(topic_name, &enhanced.relationship_attributes);
        let relationship_id = match GraphRelationship::find_by_identity(
            &subject_id,
            &object_id,
            &enhanced.predicate,
            store,
        )
        .await?
        {
            Some(existing) => {
                // The description is the relationship's identity; only the
                // attribute bag absorbs new information.
                GraphRelationship::merge_attributes(&existing.id, &attributes, store).await?;
                existing.id
            }
            None => {
                let embedding = embedder.embed(&enhanced.predicate).await?;
                let relationship = GraphRelationship::new(
                    subject_id,
                    object_id,
                    enhanced.predicate.clone(),
                    embedding,
                    attributes,
                );
                let stored = store
                    .store_item(relationship)
                    .await?
                    .ok_or_else(|| AppError::Build("relationship row was not created".into()))?;
                relationships_enhanced += 1;
                stored.id
            }
        };

        SourceGraphMapping::ensure(
            &document.source_id,
            &relationship_id,
            GraphElementType::Relationship,
            topic_name,
            store,
        )
        .await?;
    }

    info!(
        source_id = %document.source_id,
        entities_enhanced,
        relationships_enhanced,
        "reasoning enhancement applied"
    );
    Ok((entities_enhanced, relationships_enhanced))
}

/// Returns `(entity_id, touched)` where touched means created or rewritten.
async fn resolve_enhanced_entity(
    store: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    topic_name: &str,
    node: &EnhancedNode,
) -> Result<(String, bool), AppError> {
    match GraphEntity::find_by_name_and_topic(&node.name, topic_name, store).await? {
        Some(existing) => {
            if node.requires_description_update && !node.description.is_empty() {
                let attributes = merge_preserving_identity(&existing.attributes, &node.attributes);
                let embedding = embedder.embed(&node.description).await?;
                GraphEntity::apply_refinement(
                    &existing.id,
                    &existing.name,
                    &node.description,
                    attributes,
                    embedding,
                    store,
                )
                .await?;
                Ok((existing.id, true))
            } else {
                Ok((existing.id, false))
            }
        }
        None => {
            let mut cache = HashMap::new();
            let (id, _) = materialize::resolve_entity(
                store,
                embedder,
                &mut cache,
                topic_name,
                &node.name,
                &node.description,
                &node.attributes,
            )
            .await?;
            Ok((id, true))
        }
    }
}

/// Shallow-merge incoming attributes over the stored bag, keeping the stored
/// `topic_name` and `category`.
fn merge_preserving_identity(existing: &Value, incoming: &Map<String, Value>) -> Value {
    let mut merged = existing
        .as_object()
        .cloned()
        .unwrap_or_default();
    let topic = merged.get("topic_name").cloned();
    let category = merged.get("category").cloned();

    for (key, value) in incoming {
        merged.insert(key.clone(), value.clone());
    }
    if let Some(topic) = topic {
        merged.insert("topic_name".into(), topic);
    }
    if let Some(category) = category {
        merged.insert("category".into(), category);
    }

    Value::Object(merged)
}

fn reasoning_context(entities: &[GraphEntity], relationships: &[GraphRelationship]) -> String {
    let name_by_id: HashMap<&str, &str> = entities
        .iter()
        .map(|entity| (entity.id.as_str(), entity.name.as_str()))
        .collect();

    let mut context = String::from("Entities:\n");
    for entity in entities {
        context.push_str(&format!("- {}: {}\n", entity.name, entity.description));
    }
    context.push_str("\nRelationships:\n");
    for relationship in relationships {
        let source = name_by_id
            .get(relationship.source_entity_id.as_str())
            .copied()
            .unwrap_or(relationship.source_entity_id.as_str());
        let target = name_by_id
            .get(relationship.target_entity_id.as_str())
            .copied()
            .unwrap_or(relationship.target_entity_id.as_str());
        context.push_str(&format!(
            "- {source} -> {target}: {}\n",
            relationship.relationship_desc
        ));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_keeps_topic_and_category_from_the_stored_bag() {
        let existing = json!({"topic_name": "demo", "category": "narrative", "domain": "tech"});
        let mut incoming = Map::new();
        incoming.insert("topic_name".into(), json!("hijacked"));
        incoming.insert("aliases".into(), json!(["Acme Corp"]));

        let merged = merge_preserving_identity(&existing, &incoming);
        assert_eq!(merged["topic_name"], json!("demo"));
        assert_eq!(merged["category"], json!("narrative"));
        assert_eq!(merged["domain"], json!("tech"));
        assert_eq!(merged["aliases"], json!(["Acme Corp"]));
    }

    #[test]
    fn reasoning_context_names_endpoints() {
        let entities = vec![
            GraphEntity::new("Acme".into(), "a company".into(), vec![0.0], json!({})),
            GraphEntity::new("Initech".into(), "a rival".into(), vec![0.0], json!({})),
        ];
        let relationship = GraphRelationship::new(
            entities[0].id.clone(),
            entities[1].id.clone(),
            "acquired".into(),
            vec![0.0],
            json!({}),
        );

        let context = reasoning_context(&entities, &[relationship]);
        assert!(context.contains("- Acme: a company"));
        assert!(context.contains("- Acme -> Initech: acquired"));
    }
}
