use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{cognitive_map::CognitiveMap, source_data::SourceDocument},
    },
    utils::{
        json::{parse_llm_json, JsonShape},
        llm::LanguageModel,
    },
};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};

use crate::prompts;

use super::{
    map_guard_error,
    state::{BuildMachine, Mapped, Ready},
    BuildConfig, BuildContext,
};

/// Stage 1: one cognitive map per document, cached by `(topic, source)` so a
/// re-run costs nothing. Maps are persisted before stage 2 starts.
#[instrument(level = "trace", skip_all, fields(topic = %ctx.topic_name))]
pub(crate) async fn generate_maps(
    machine: BuildMachine<(), Ready>,
    ctx: &mut BuildContext<'_>,
) -> Result<BuildMachine<(), Mapped>, AppError> {
    let topic_name = ctx.topic_name;
    let store = ctx.store;
    let llm = ctx.llm;
    let config = ctx.config;

    let results: Vec<(String, serde_json::Value, bool)> =
        stream::iter(ctx.documents.iter().map(|document| async move {
            map_single_document(topic_name, document, store, llm, config).await
        }))
        .buffer_unordered(config.map_concurrency.max(1))
        .try_collect()
        .await?;

    for (source_id, map, generated) in results {
        if generated {
            ctx.report.maps_generated += 1;
        }
        ctx.maps.insert(source_id, map);
    }

    info!(
        total = ctx.maps.len(),
        generated = ctx.report.maps_generated,
        "cognitive maps ready"
    );

    machine
        .map_documents()
        .map_err(|(_, guard)| map_guard_error("map_documents", &guard))
}

async fn map_single_document(
    topic_name: &str,
    document: &SourceDocument,
    store: &SurrealDbClient,
    llm: &dyn LanguageModel,
    config: &BuildConfig,
) -> Result<(String, serde_json::Value, bool), AppError> {
    if !config.force_regenerate_maps {
        if let Some(cached) = CognitiveMap::find(topic_name, &document.source_id, store).await? {
            debug!(source_id = %document.source_id, "reusing cached cognitive map");
            return Ok((document.source_id.clone(), cached.map, false));
        }
    }

    let prompt = prompts::cognitive_map_prompt(topic_name, document);
    let response = llm
        .generate(&prompt, config.cognitive_map_max_tokens)
        .await?;
    let map = parse_llm_json(llm, &response, JsonShape::Object).await?;

    CognitiveMap::new(
        topic_name.to_string(),
        document.source_id.clone(),
        map.clone(),
    )
    .upsert(store)
    .await?;
    debug!(source_id = %document.source_id, "cognitive map generated");

    Ok((document.source_id.clone(), map, true))
}
