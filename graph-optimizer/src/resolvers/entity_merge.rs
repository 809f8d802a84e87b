use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            graph_entity::GraphEntity, graph_relationship::GraphRelationship,
            source_graph_mapping::GraphElementType,
        },
    },
    utils::{
        embedding::EmbeddingProvider,
        json::{parse_llm_json, JsonShape},
        llm::LanguageModel,
    },
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{issue::Issue, retrieval::source_texts_for_elements};

use super::{
    entity_name_map, extract_attributes, format_relationship_lines,
    merge_attributes_preserving_identity, render_sources, select_source_texts, Resolution,
    RESOLVER_MAX_TOKENS,
};

fn merge_prompt(
    issue: &Issue,
    entities: &[GraphEntity],
    relationship_lines: &[String],
    sources: &str,
) -> String {
    format!(
        r#"You are an expert assistant specializing in knowledge graph curation, tasked with intelligently consolidating redundant entity information.

## Objective

Synthesize a single, authoritative, high-quality entity from a group of redundant ones. The merged entity should be more comprehensive and coherent than any individual source entity. Never invent facts not present in the input data.

## Input Data

1. Redundancy issue:
```json
{issue}
```

2. Entities to merge:
```json
{entities}
```

3. Relevant relationships:
```json
{relationships}
```

4. Relevant source excerpts:
{sources}

## Guidelines

- Name: the most representative, widely recognized, unambiguous one; record the others as aliases.
- Description: synthesize a new coherent narrative integrating the most significant information from all sources.
- Attributes: consolidate, preferring what is most current and representative; every field must be supported by the inputs.

Return a single JSON object (surrounded by ```json and ```):

```json
{{
"name": "...",
"description": "...",
"attributes": {{}}
}}
```"#,
        issue = json!({
            "issue_type": issue.issue_type.as_str(),
            "reasoning": issue.reasoning,
            "affected_ids": issue.affected_ids,
        }),
        entities = Value::Array(
            entities
                .iter()
                .map(|entity| json!({
                    "id": entity.id,
                    "name": entity.name,
                    "description": entity.description,
                    "attributes": entity.attributes,
                }))
                .collect()
        ),
        relationships = Value::from(relationship_lines.to_vec()),
    )
}

/// Merge the affected entities into one fresh row, repoint every
/// relationship endpoint and every entity lineage mapping, and delete the
/// originals, all in one transaction.
pub(crate) async fn process(
    store: &SurrealDbClient,
    llm: &dyn LanguageModel,
    embedder: &EmbeddingProvider,
    issue: &Issue,
) -> Result<Resolution, AppError> {
    let entities = GraphEntity::fetch_by_ids(&issue.affected_ids, store).await?;
    if entities.len() < 2 {
        warn!(
            found = entities.len(),
            "not enough entities left to merge, skipping"
        );
        return Ok(Resolution::Skipped);
    }

    let original_ids: Vec<String> = entities.iter().map(|entity| entity.id.clone()).collect();

    let relationships = GraphRelationship::by_entity_ids(original_ids.clone(), store).await?;
    let mut endpoint_ids: Vec<String> = relationships
        .iter()
        .flat_map(|r| [r.source_entity_id.clone(), r.target_entity_id.clone()])
        .collect();
    endpoint_ids.sort();
    endpoint_ids.dedup();
    let endpoints = GraphEntity::fetch_by_ids(&endpoint_ids, store).await?;
    let relationship_lines = format_relationship_lines(&relationships, &entity_name_map(&endpoints));

    let sources =
        source_texts_for_elements(original_ids.clone(), GraphElementType::Entity, store).await?;
    let consumed: usize = relationship_lines.iter().map(|l| l.chars().count()).sum();
    let selected = select_source_texts(&sources, consumed);

    let prompt = merge_prompt(issue, &entities, &relationship_lines, &render_sources(&selected));
    let response = llm.generate(&prompt, RESOLVER_MAX_TOKENS).await?;
    let merged = parse_llm_json(llm, &response, JsonShape::Object).await?;

    let Some(name) = merged.get("name").and_then(Value::as_str) else {
        return Err(AppError::Optimizer("entity merge result is missing a name".into()));
    };
    let Some(description) = merged.get("description").and_then(Value::as_str) else {
        return Err(AppError::Optimizer(
            "entity merge result is missing a description".into(),
        ));
    };

    // Identity keys come from the first original; the merged row must stay in
    // the same topic partition.
    let attributes = merge_attributes_preserving_identity(
        &entities[0].attributes,
        &extract_attributes(&merged),
    );
    let embedding = embedder.embed(description).await?;
    let merged_entity = GraphEntity::new(
        name.to_string(),
        description.to_string(),
        embedding,
        attributes,
    );
    let merged_id = merged_entity.id.clone();

    store
        .query(
            "BEGIN TRANSACTION;
             CREATE type::thing('graph_entity', $merged_id) CONTENT $merged;
             UPDATE graph_relationship SET source_entity_id = $merged_id
                 WHERE source_entity_id IN $original_ids;
             UPDATE graph_relationship SET target_entity_id = $merged_id
                 WHERE target_entity_id IN $original_ids;
             UPDATE source_graph_mapping SET graph_element_id = $merged_id
                 WHERE graph_element_id IN $original_ids AND graph_element_type = 'entity';
             FOR $original_id IN $original_ids {
                 DELETE type::thing('graph_entity', $original_id);
             };
             COMMIT TRANSACTION;",
        )
        .bind(("merged_id", merged_id.clone()))
        .bind(("merged", merged_entity))
        .bind(("original_ids", original_ids.clone()))
        .await?
        .check()?;

    info!(
        merged_id = %merged_id,
        originals = original_ids.len(),
        "entities merged with references repointed"
    );
    Ok(Resolution::Applied)
}
