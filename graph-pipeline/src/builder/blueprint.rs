use common::{
    error::AppError,
    storage::types::analysis_blueprint::AnalysisBlueprint,
    utils::json::{parse_llm_json, JsonShape},
};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::prompts;

use super::{
    map_guard_error,
    state::{BuildMachine, Mapped, Planned},
    BuildContext,
};

/// Stage 2: one LLM call over all cognitive maps yields the topic's global
/// blueprint. An existing blueprint is reused unless regeneration is forced;
/// regeneration appends a new row (the latest wins).
#[instrument(level = "trace", skip_all, fields(topic = %ctx.topic_name))]
pub(crate) async fn generate(
    machine: BuildMachine<(), Mapped>,
    ctx: &mut BuildContext<'_>,
) -> Result<BuildMachine<(), Planned>, AppError> {
    if !ctx.config.force_regenerate_blueprint {
        if let Some(existing) =
            AnalysisBlueprint::latest_for_topic(ctx.topic_name, ctx.store).await?
        {
            info!(blueprint_id = %existing.id, "using existing global blueprint");
            ctx.report.blueprint_id = existing.id.clone();
            ctx.blueprint = Some(existing);
            return machine
                .plan()
                .map_err(|(_, guard)| map_guard_error("plan", &guard));
        }
    }

    // Keep document order stable so the prompt (and its cache behavior) is
    // deterministic.
    let maps: Vec<Value> = ctx
        .documents
        .iter()
        .filter_map(|doc| ctx.maps.get(&doc.source_id).cloned())
        .collect();
    if maps.is_empty() {
        return Err(AppError::Build(format!(
            "no cognitive maps found for topic: {}",
            ctx.topic_name
        )));
    }
    let map_count = maps.len();

    let prompt = prompts::blueprint_prompt(ctx.topic_name, &Value::Array(maps));
    let response = ctx
        .llm
        .generate(&prompt, ctx.config.blueprint_max_tokens)
        .await
        .map_err(|e| AppError::Build(format!("error generating global blueprint: {e}")))?;
    let blueprint_data = parse_llm_json(ctx.llm, &response, JsonShape::Object).await?;

    let canonical_entities = blueprint_data
        .get("canonical_entities")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let key_patterns = blueprint_data
        .get("key_patterns")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let global_timeline = blueprint_data
        .get("global_timeline")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let processing_instructions =
        flatten_instructions(blueprint_data.get("processing_instructions"));

    let processing_items = json!({
        "canonical_entities": canonical_entities,
        "key_patterns": key_patterns,
        "global_timeline": global_timeline,
        "document_count": map_count,
    });

    let blueprint = AnalysisBlueprint::new(
        ctx.topic_name.to_string(),
        processing_items,
        processing_instructions,
    );
    let stored = ctx
        .store
        .store_item(blueprint)
        .await?
        .ok_or_else(|| AppError::Build("blueprint row was not created".into()))?;

    info!(blueprint_id = %stored.id, document_count = map_count, "global blueprint generated");
    ctx.report.blueprint_id = stored.id.clone();
    ctx.blueprint = Some(stored);

    machine
        .plan()
        .map_err(|(_, guard)| map_guard_error("plan", &guard))
}

/// The model may return instructions as free text or as a map of sections;
/// a map is flattened to `SECTION:\n<value>` blocks.
fn flatten_instructions(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(sections)) => {
            let mut parts = Vec::new();
            for (key, section) in sections {
                let rendered = match section {
                    Value::String(text) => text.clone(),
                    Value::Null => continue,
                    other => other.to_string(),
                };
                if rendered.is_empty() {
                    continue;
                }
                parts.push(format!("{}:", key.to_uppercase()));
                parts.push(rendered);
                parts.push(String::new());
            }
            parts.join("\n")
        }
        _ => String::new(),
    }
}
