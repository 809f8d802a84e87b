use std::sync::Arc;

use common::{
    storage::registry::StoreRegistry,
    utils::{
        config::get_config,
        embedding::EmbeddingProvider,
        llm::{ChatModel, LanguageModel},
    },
};
use graph_optimizer::{
    config::{OptimizationConfig, ProcessingConfig},
    engine::GraphOptimizer,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "knowledge graph quality".to_string());

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedder = Arc::new(EmbeddingProvider::new_openai(
        Arc::clone(&openai_client),
        &config.embedding_model,
        config.embedding_dimensions,
    ));
    let llm: Arc<dyn LanguageModel> = Arc::new(ChatModel::new(
        Arc::clone(&openai_client),
        &config.completion_model,
    ));

    let critic_models = if config.critic_models.is_empty() {
        vec![config.completion_model.clone()]
    } else {
        config.critic_models.clone()
    };
    let critics: Vec<(String, Arc<dyn LanguageModel>)> = critic_models
        .into_iter()
        .map(|model| {
            let critic: Arc<dyn LanguageModel> =
                Arc::new(ChatModel::new(Arc::clone(&openai_client), &model));
            (model, critic)
        })
        .collect();

    // The optimizer targets the tenant named by GRAPH_DATABASE_URI, falling
    // back to the local store.
    let registry = Arc::new(StoreRegistry::new(&config, embedder.dimension()).await?);
    let target_uri = config.graph_database_uri.clone().unwrap_or_default();
    let store = registry.get(&target_uri).await?;

    let optimizer = GraphOptimizer::new(
        store,
        llm,
        critics,
        embedder,
        OptimizationConfig {
            processing: ProcessingConfig {
                state_file_path: config.optimizer_state_file.clone().into(),
                ..ProcessingConfig::default()
            },
        },
    );

    info!(%query, "starting graph optimization run");
    let report = optimizer.run(&query).await?;
    info!(
        detected = report.detected,
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failed,
        "optimization run complete"
    );

    Ok(())
}
