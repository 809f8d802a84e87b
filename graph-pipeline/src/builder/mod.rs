mod blueprint;
mod cognitive;
mod enhance;
mod materialize;
mod state;
mod triplets;

pub use triplets::{Triplet, TripletNode};

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{analysis_blueprint::AnalysisBlueprint, source_data::SourceDocument},
    },
    utils::{embedding::EmbeddingProvider, llm::LanguageModel},
};
use serde::Serialize;
use state_machines::core::GuardError;
use tracing::{error, info};

use self::state::ready;

/// Knobs for one builder instance. The token ceilings follow the shape of the
/// original pipeline: small for per-document maps, larger for extraction.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub force_regenerate_maps: bool,
    pub force_regenerate_blueprint: bool,
    pub map_concurrency: usize,
    pub cognitive_map_max_tokens: u32,
    pub blueprint_max_tokens: u32,
    pub extraction_max_tokens: u32,
    pub enhancement_max_tokens: u32,
    pub connection_retry_attempts: u32,
    pub connection_retry_delay_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            force_regenerate_maps: false,
            force_regenerate_blueprint: false,
            map_concurrency: 4,
            cognitive_map_max_tokens: 4_096,
            blueprint_max_tokens: 8_192,
            extraction_max_tokens: 16_384,
            enhancement_max_tokens: 8_192,
            connection_retry_attempts: 3,
            connection_retry_delay_ms: 1_000,
        }
    }
}

/// What one `build` call did, stage by stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub topic_name: String,
    pub documents_processed: usize,
    pub documents_skipped: usize,
    pub maps_generated: usize,
    pub blueprint_id: String,
    pub triplets_extracted: usize,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub entities_enhanced: usize,
    pub relationships_enhanced: usize,
}

/// Runs the narrative extraction pipeline for one topic against one tenant
/// store: cognitive maps → blueprint → triplets → graph, then a reasoning
/// pass per document.
pub struct GraphBuilder {
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<EmbeddingProvider>,
    config: BuildConfig,
}

pub(crate) struct BuildContext<'a> {
    pub topic_name: &'a str,
    pub store: &'a SurrealDbClient,
    pub llm: &'a dyn LanguageModel,
    pub embedder: &'a EmbeddingProvider,
    pub config: &'a BuildConfig,
    pub documents: &'a [SourceDocument],
    /// source_id → cognitive map JSON, filled by stage 1.
    pub maps: HashMap<String, serde_json::Value>,
    pub blueprint: Option<AnalysisBlueprint>,
    /// entity name → id, scoped to this build.
    pub entity_cache: HashMap<String, String>,
    pub report: BuildReport,
}

impl<'a> BuildContext<'a> {
    fn new(
        builder: &'a GraphBuilder,
        store: &'a SurrealDbClient,
        topic_name: &'a str,
        documents: &'a [SourceDocument],
    ) -> Self {
        Self {
            topic_name,
            store,
            llm: builder.llm.as_ref(),
            embedder: builder.embedder.as_ref(),
            config: &builder.config,
            documents,
            maps: HashMap::new(),
            blueprint: None,
            entity_cache: HashMap::new(),
            report: BuildReport {
                topic_name: topic_name.to_string(),
                ..BuildReport::default()
            },
        }
    }

    pub fn blueprint(&self) -> Result<&AnalysisBlueprint, AppError> {
        self.blueprint
            .as_ref()
            .ok_or_else(|| AppError::Build("blueprint expected to be available".into()))
    }

    pub fn abort(&self, err: AppError) -> AppError {
        error!(
            topic = %self.topic_name,
            error = %err,
            "graph build aborted"
        );
        err
    }
}

impl GraphBuilder {
    pub fn new(llm: Arc<dyn LanguageModel>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self::with_config(llm, embedder, BuildConfig::default())
    }

    pub fn with_config(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<EmbeddingProvider>,
        config: BuildConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            config,
        }
    }

    #[tracing::instrument(skip_all, fields(topic = %topic_name, documents = documents.len()))]
    pub async fn build(
        &self,
        store: &SurrealDbClient,
        topic_name: &str,
        documents: &[SourceDocument],
    ) -> Result<BuildReport, AppError> {
        if documents.is_empty() {
            return Err(AppError::Build(format!(
                "no documents to build topic {topic_name} from"
            )));
        }

        let mut ctx = BuildContext::new(self, store, topic_name, documents);
        let machine = ready();

        let build_started = Instant::now();

        let stage_start = Instant::now();
        let machine = cognitive::generate_maps(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let map_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = blueprint::generate(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let blueprint_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = triplets::extract_documents(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let extract_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = enhance::enhance_documents(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let enhance_duration = stage_start.elapsed();

        info!(
            topic = %ctx.topic_name,
            total_ms = duration_millis(build_started.elapsed()),
            map_ms = duration_millis(map_duration),
            blueprint_ms = duration_millis(blueprint_duration),
            extract_ms = duration_millis(extract_duration),
            enhance_ms = duration_millis(enhance_duration),
            entities = ctx.report.entities_created,
            relationships = ctx.report.relationships_created,
            "graph build finished"
        );

        Ok(ctx.report)
    }

    /// Re-run the reasoning pass for a single `(source, topic)` pair, e.g.
    /// after data corrections. Returns `(entities_enhanced,
    /// relationships_enhanced)`.
    pub async fn enhance_document(
        &self,
        store: &SurrealDbClient,
        topic_name: &str,
        document: &SourceDocument,
    ) -> Result<(usize, usize), AppError> {
        enhance::enhance_single(
            store,
            self.llm.as_ref(),
            self.embedder.as_ref(),
            &self.config,
            topic_name,
            document,
        )
        .await
    }
}

pub(crate) fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::Build(format!(
        "invalid build pipeline transition during {event}: {guard:?}"
    ))
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
