use std::collections::HashSet;

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
    entity_name_map, render_sources, select_source_texts, Resolution, RESOLVER_MAX_TOKENS,
};

fn merge_prompt(issue: &Issue, relationship_lines: &[String], sources: &str) -> String {
    format!(
        r#"You are an expert assistant specializing in knowledge graph curation, tasked with intelligently consolidating redundant relationship information.

## Objective

Synthesize a single, authoritative relationship from a group of redundant entries that connect the same entities with the same semantic meaning. The merged description should be more comprehensive and better defined than any individual entry, strictly based on the provided evidence.

## Input Data

1. Redundancy issue:
```json
{issue}
```

2. Relationships to merge (each line is `source(source_entity_id) -> target(target_entity_id): description`):
```json
{relationships}
```

3. Relevant source excerpts:
{sources}

Return a single JSON object using entity ids from the input (surrounded by ```json and ```):

```json
{{
"source_entity_id": "...",
"target_entity_id": "...",
"description": "..."
}}
```"#,
        issue = json!({
            "issue_type": issue.issue_type.as_str(),
            "reasoning": issue.reasoning,
            "affected_ids": issue.affected_ids,
        }),
        relationships = Value::from(relationship_lines.to_vec()),
    )
}

/// Merge redundant relationships into one fresh row, repoint their lineage
/// mappings, and delete the originals. The originals must span exactly one
/// or two distinct entities; the model's endpoint choice is validated against
/// the originals and falls back to the first original's endpoints.
pub(crate) async fn process(
    store: &SurrealDbClient,
    llm: &dyn LanguageModel,
    embedder: &EmbeddingProvider,
    issue: &Issue,
) -> Result<Resolution, AppError> {
    let relationships = GraphRelationship::fetch_by_ids(&issue.affected_ids, store).await?;
    if relationships.len() < 2 {
        warn!(
            found = relationships.len(),
            "not enough relationships left to merge, skipping"
        );
        return Ok(Resolution::Skipped);
    }

    let mut distinct_endpoints = HashSet::new();
    for relationship in &relationships {
        distinct_endpoints.insert(relationship.source_entity_id.clone());
        distinct_endpoints.insert(relationship.target_entity_id.clone());
    }
    if !(1..=2).contains(&distinct_endpoints.len()) {
        warn!(
            endpoints = distinct_endpoints.len(),
            "relationships span more than two entities, cannot merge"
        );
        return Ok(Resolution::Skipped);
    }

    let endpoint_ids: Vec<String> = distinct_endpoints.iter().cloned().collect();
    let endpoints = GraphEntity::fetch_by_ids(&endpoint_ids, store).await?;
    let names = entity_name_map(&endpoints);

    let mut relationship_lines = Vec::with_capacity(relationships.len());
    for relationship in &relationships {
        let source = names
            .get(&relationship.source_entity_id)
            .cloned()
            .unwrap_or_else(|| relationship.source_entity_id.clone());
        let target = names
            .get(&relationship.target_entity_id)
            .cloned()
            .unwrap_or_else(|| relationship.target_entity_id.clone());
        relationship_lines.push(format!(
            "{source}(source_entity_id={}) -> {target}(target_entity_id={}): {}",
            relationship.source_entity_id,
            relationship.target_entity_id,
            relationship.relationship_desc
        ));
    }

    let original_ids: Vec<String> = relationships.iter().map(|r| r.id.clone()).collect();
    let sources =
        source_texts_for_elements(original_ids.clone(), GraphElementType::Relationship, store)
            .await?;
    let consumed: usize = relationship_lines.iter().map(|l| l.chars().count()).sum();
    let selected = select_source_texts(&sources, consumed);

    let prompt = merge_prompt(issue, &relationship_lines, &render_sources(&selected));
    let response = llm.generate(&prompt, RESOLVER_MAX_TOKENS).await?;
    let merged = parse_llm_json(llm, &response, JsonShape::Object).await?;

    let Some(description) = merged
        .get("description")
        .or_else(|| merged.get("relationship_desc"))
        .and_then(Value::as_str)
    else {
        return Err(AppError::Optimizer(
            "relationship merge result is missing a description".into(),
        ));
    };

    // Endpoint validation: the returned ids must come from the originals,
    // otherwise fall back to the first original's endpoints.
    let candidate_source = relationships[0].source_entity_id.clone();
    let candidate_target = relationships[0].target_entity_id.clone();

    let mut actual_source = candidate_source.clone();
    if let Some(returned) = merged.get("source_entity_id").and_then(Value::as_str) {
        if returned == candidate_source || returned == candidate_target {
            actual_source = returned.to_string();
        }
    }
    let actual_target = if actual_source == candidate_target {
        candidate_source
    } else {
        candidate_target
    };

    // Attributes carry over from the first original; the description is new.
    let embedding = embedder.embed(description).await?;
    let merged_relationship = GraphRelationship::new(
        actual_source,
        actual_target,
        description.to_string(),
        embedding,
        relationships[0].attributes.clone(),
    );
    let merged_id = merged_relationship.id.clone();

    store
        .query(
            "BEGIN TRANSACTION;
             CREATE type::thing('graph_relationship', $merged_id) CONTENT $merged;
             UPDATE source_graph_mapping SET graph_element_id = $merged_id
                 WHERE graph_element_id IN $original_ids AND graph_element_type = 'relationship';
             FOR $original_id IN $original_ids {
                 DELETE type::thing('graph_relationship', $original_id);
             };
             COMMIT TRANSACTION;",
        )
        .bind(("merged_id", merged_id.clone()))
        .bind(("merged", merged_relationship))
        .bind(("original_ids", original_ids.clone()))
        .await?
        .check()?;

    info!(
        merged_id = %merged_id,
        originals = original_ids.len(),
        "relationships merged with mappings repointed"
    );
    Ok(Resolution::Applied)
}
