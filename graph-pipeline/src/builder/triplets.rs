use common::{
    error::AppError,
    storage::types::source_graph_mapping::SourceGraphMapping,
    utils::json::{parse_llm_json, JsonShape},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::prompts;

use super::{
    map_guard_error, materialize,
    state::{BuildMachine, Extracted, Planned},
    BuildContext,
};

/// One endpoint of an extracted triplet. Fields beyond the name are optional;
/// models drop them under pressure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripletNode {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// A narrative triplet as extracted from one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Triplet {
    pub subject: TripletNode,
    pub predicate: String,
    pub object: TripletNode,
    #[serde(default)]
    pub relationship_attributes: Map<String, Value>,
}

/// Stages 3 and 4: per document, extract narrative triplets (unless the
/// source already contributed to this topic) and materialize them one at a
/// time. A triplet that fails to materialize is dropped, not the document.
#[instrument(level = "trace", skip_all, fields(topic = %ctx.topic_name))]
pub(crate) async fn extract_documents(
    machine: BuildMachine<(), Planned>,
    ctx: &mut BuildContext<'_>,
) -> Result<BuildMachine<(), Extracted>, AppError> {
    for document in ctx.documents {
        if SourceGraphMapping::exists_for_source_and_topic(
            &document.source_id,
            ctx.topic_name,
            ctx.store,
        )
        .await?
        {
            info!(source_id = %document.source_id, name = %document.name, "document already extracted, skipping");
            ctx.report.documents_skipped += 1;
            continue;
        }

        let blueprint = ctx.blueprint()?;
        let cognitive_map = ctx.maps.get(&document.source_id);
        let prompt = prompts::triplet_extraction_prompt(
            ctx.topic_name,
            blueprint,
            cognitive_map,
            document,
        );

        let response = ctx
            .llm
            .generate(&prompt, ctx.config.extraction_max_tokens)
            .await
            .map_err(|e| {
                AppError::Build(format!(
                    "error extracting from document {}: {e}",
                    document.name
                ))
            })?;
        let value = parse_llm_json(ctx.llm, &response, JsonShape::Array).await?;
        let triplets = project_triplets(&value);

        info!(
            source_id = %document.source_id,
            name = %document.name,
            triplets = triplets.len(),
            "narrative triplets extracted"
        );
        ctx.report.triplets_extracted += triplets.len();

        for triplet in &triplets {
            match materialize::materialize_triplet_with_retry(
                ctx.store,
                ctx.embedder,
                ctx.config,
                ctx.topic_name,
                &document.source_id,
                triplet,
                &mut ctx.entity_cache,
            )
            .await
            {
                Ok(outcome) => {
                    ctx.report.entities_created += outcome.entities_created;
                    if outcome.relationship_created {
                        ctx.report.relationships_created += 1;
                    }
                }
                Err(err) => {
                    warn!(
                        source_id = %document.source_id,
                        predicate = %triplet.predicate,
                        error = %err,
                        "failed to materialize triplet, dropping it"
                    );
                }
            }
        }

        ctx.report.documents_processed += 1;
    }

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

/// Project the tolerant JSON array into typed triplets, skipping malformed
/// elements instead of failing the document.
pub(crate) fn project_triplets(value: &Value) -> Vec<Triplet> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Triplet>(item.clone()) {
            Ok(triplet) if !triplet.subject.name.is_empty() && !triplet.object.name.is_empty() => {
                Some(triplet)
            }
            Ok(_) => {
                warn!("triplet with empty endpoint name dropped");
                None
            }
            Err(err) => {
                warn!(error = %err, "malformed triplet dropped");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projection_tolerates_missing_optional_fields() {
        let value = json!([
            {
                "subject": {"name": "Acme"},
                "predicate": "acquired Initech in 2024",
                "object": {"name": "Initech", "description": "a software firm"}
            }
        ]);

        let triplets = project_triplets(&value);
        assert_eq!(triplets.len(), 1);
        assert_eq!(triplets[0].subject.description, "");
        assert!(triplets[0].relationship_attributes.is_empty());
    }

    #[test]
    fn projection_drops_malformed_and_empty_named_elements() {
        let value = json!([
            {"subject": {"name": ""}, "predicate": "x", "object": {"name": "B"}},
            {"predicate": "missing endpoints"},
            {"subject": {"name": "A"}, "predicate": "works with", "object": {"name": "B"}},
            "not even an object"
        ]);

        let triplets = project_triplets(&value);
        assert_eq!(triplets.len(), 1);
        assert_eq!(triplets[0].predicate, "works with");
    }
}
