use std::{sync::Arc, time::Duration};

use common::{
    storage::registry::StoreRegistry,
    utils::{config::get_config, embedding::EmbeddingProvider, llm::ChatModel},
};
use graph_pipeline::{builder::GraphBuilder, scheduler::BuildScheduler};
use tokio::sync::watch;
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
    let llm = Arc::new(ChatModel::new(
        Arc::clone(&openai_client),
        &config.completion_model,
    ));

    let registry = Arc::new(StoreRegistry::new(&config, embedder.dimension()).await?);
    let builder = Arc::new(GraphBuilder::new(llm, embedder));
    let scheduler = BuildScheduler::new(
        registry,
        builder,
        Duration::from_secs(config.check_interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_tx.send(true).ok();
        }
    });

    info!("Starting graph build worker");
    scheduler.run(shutdown_rx).await;

    Ok(())
}
