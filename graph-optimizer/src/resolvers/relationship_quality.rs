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

use super::{render_sources, select_source_texts, Resolution, RESOLVER_MAX_TOKENS};

fn refine_prompt(
    issue: &Issue,
    source_name: &str,
    target_name: &str,
    relationship: &GraphRelationship,
    sources: &str,
) -> String {
    format!(
        r#"You are an expert assistant specializing in knowledge graph curation, tasked with rectifying quality issues within a single relationship by providing an improved description.

## Objective

Craft an accurate, coherent, semantically meaningful description of the connection between the source and target entities. The improved description must correct the identified flaws (vagueness, ambiguity) and be strictly supported by the evidence; never invent details.

## Input Data

1. Relationship quality issue:
```json
{issue}
```

2. Relationship to improve:
```json
{relationship}
```

3. Relevant source excerpts:
{sources}

Instead of "System A affects System B", a good description (when the evidence supports it) reads "System A sends real-time transaction data to System B for fraud analysis".

Return a single JSON object (surrounded by ```json and ```):

```json
{{
"source_entity_name": "{source_name}",
"target_entity_name": "{target_name}",
"description": "..."
}}
```"#,
        issue = json!({
            "issue_type": issue.issue_type.as_str(),
            "reasoning": issue.reasoning,
            "affected_ids": issue.affected_ids,
        }),
        relationship = json!({
            "id": relationship.id,
            "source_entity_name": source_name,
            "target_entity_name": target_name,
            "description": relationship.relationship_desc,
            "attributes": relationship.attributes,
        }),
    )
}

/// Rewrite each affected relationship's description in place and re-embed
/// it. Attributes (including `topic_name`/`category`) are untouched.
pub(crate) async fn process(
    store: &SurrealDbClient,
    llm: &dyn LanguageModel,
    embedder: &EmbeddingProvider,
    issue: &Issue,
) -> Result<Resolution, AppError> {
    let mut refined_any = false;

    for affected_id in &issue.affected_ids {
        let Some(relationship) = store.get_item::<GraphRelationship>(affected_id).await? else {
            warn!(relationship_id = %affected_id, "relationship missing, skipping refinement");
            continue;
        };

        let endpoint_ids = vec![
            relationship.source_entity_id.clone(),
            relationship.target_entity_id.clone(),
        ];
        let endpoints = GraphEntity::fetch_by_ids(&endpoint_ids, store).await?;
        let name_of = |id: &str| {
            endpoints
                .iter()
                .find(|entity| entity.id == id)
                .map_or_else(|| id.to_string(), |entity| entity.name.clone())
        };
        let source_name = name_of(&relationship.source_entity_id);
        let target_name = name_of(&relationship.target_entity_id);

        let sources = source_texts_for_elements(
            vec![affected_id.clone()],
            GraphElementType::Relationship,
            store,
        )
        .await?;
        let selected = select_source_texts(&sources, 0);

        let prompt = refine_prompt(
            issue,
            &source_name,
            &target_name,
            &relationship,
            &render_sources(&selected),
        );
        let response = llm.generate(&prompt, RESOLVER_MAX_TOKENS).await?;
        let refined = parse_llm_json(llm, &response, JsonShape::Object).await?;

        let Some(description) = refined
            .get("description")
            .or_else(|| refined.get("relationship_desc"))
            .and_then(Value::as_str)
        else {
            return Err(AppError::Optimizer(format!(
                "refinement for relationship {affected_id} is missing a description"
            )));
        };

        let embedding = embedder.embed(description).await?;
        GraphRelationship::apply_refinement(affected_id, description, embedding, store).await?;
        info!(relationship_id = %affected_id, "relationship description refined");
        refined_any = true;
    }

    Ok(if refined_any {
        Resolution::Applied
    } else {
        Resolution::Skipped
    })
}
