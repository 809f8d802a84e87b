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

fn refine_prompt(
    issue: &Issue,
    entity: &GraphEntity,
    relationship_lines: &[String],
    sources: &str,
) -> String {
    format!(
        r#"You are an expert assistant specializing in knowledge graph curation, tasked with rectifying quality issues within a single entity.

## Objective

Transform a problematic entity into an accurate, coherent, meaningful and self-contained representation. Correct the identified flaws and enrich the entity using the available context; never invent facts not present in the input data.

## Input Data

1. Entity quality issue:
```json
{issue}
```

2. Entity to improve:
```json
{entity}
```

3. Relevant relationships (how this entity interacts with others):
```json
{relationships}
```

4. Relevant source excerpts:
{sources}

## Guidelines

- Name: precise and unambiguous; move significant former names into the aliases attribute.
- Description: synthesize a new coherent narrative that resolves the issue; every statement must be traceable to the provided context.
- Attributes: correct erroneous values and add fields only when they carry essential context.

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
        entity = json!({
            "id": entity.id,
            "name": entity.name,
            "description": entity.description,
            "attributes": entity.attributes,
        }),
        relationships = Value::from(relationship_lines.to_vec()),
    )
}

/// Refine each affected entity in place: new name/description/attributes,
/// re-embedded description, stored `topic_name`/`category` preserved.
pub(crate) async fn process(
    store: &SurrealDbClient,
    llm: &dyn LanguageModel,
    embedder: &EmbeddingProvider,
    issue: &Issue,
) -> Result<Resolution, AppError> {
    let mut refined_any = false;

    for affected_id in &issue.affected_ids {
        let Some(entity) = store.get_item::<GraphEntity>(affected_id).await? else {
            warn!(entity_id = %affected_id, "entity missing, skipping refinement");
            continue;
        };

        let relationships =
            GraphRelationship::by_entity_ids(vec![affected_id.clone()], store).await?;
        let mut endpoint_ids: Vec<String> = relationships
            .iter()
            .flat_map(|r| [r.source_entity_id.clone(), r.target_entity_id.clone()])
            .collect();
        endpoint_ids.sort();
        endpoint_ids.dedup();
        let endpoints = GraphEntity::fetch_by_ids(&endpoint_ids, store).await?;
        let relationship_lines = format_relationship_lines(&relationships, &entity_name_map(&endpoints));

        let sources = source_texts_for_elements(
            vec![affected_id.clone()],
            GraphElementType::Entity,
            store,
        )
        .await?;
        let consumed: usize = relationship_lines.iter().map(|l| l.chars().count()).sum();
        let selected = select_source_texts(&sources, consumed);

        let prompt = refine_prompt(issue, &entity, &relationship_lines, &render_sources(&selected));
        let response = llm.generate(&prompt, RESOLVER_MAX_TOKENS).await?;
        let refined = parse_llm_json(llm, &response, JsonShape::Object).await?;

        let Some(name) = refined.get("name").and_then(Value::as_str) else {
            return Err(AppError::Optimizer(format!(
                "refinement for entity {affected_id} is missing a name"
            )));
        };
        let Some(description) = refined.get("description").and_then(Value::as_str) else {
            return Err(AppError::Optimizer(format!(
                "refinement for entity {affected_id} is missing a description"
            )));
        };

        let attributes =
            merge_attributes_preserving_identity(&entity.attributes, &extract_attributes(&refined));
        let embedding = embedder.embed(description).await?;
        GraphEntity::apply_refinement(affected_id, name, description, attributes, embedding, store)
            .await?;
        info!(entity_id = %affected_id, "entity refined in place");
        refined_any = true;
    }

    Ok(if refined_any {
        Resolution::Applied
    } else {
        Resolution::Skipped
    })
}
