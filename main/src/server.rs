use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::registry::StoreRegistry,
    utils::{
        config::get_config,
        embedding::EmbeddingProvider,
        llm::ChatModel,
    },
};
use graph_pipeline::ingest::KnowledgeIngestor;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
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
    let ingestor = Arc::new(KnowledgeIngestor::new(llm, embedder));

    let state = ApiState::new(registry, ingestor, config.upload_dir.clone());
    let app = Router::new()
        .nest("/api/v1", api_routes_v1())
        .with_state(state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
