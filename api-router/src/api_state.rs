use std::{path::PathBuf, sync::Arc};

use common::storage::registry::StoreRegistry;
use graph_pipeline::ingest::KnowledgeIngestor;

/// Shared state for the knowledge API surface.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<StoreRegistry>,
    pub ingestor: Arc<KnowledgeIngestor>,
    pub upload_dir: PathBuf,
}

impl ApiState {
    pub fn new(
        registry: Arc<StoreRegistry>,
        ingestor: Arc<KnowledgeIngestor>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            ingestor,
            upload_dir: upload_dir.into(),
        }
    }
}
