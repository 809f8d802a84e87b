use std::{path::Path, sync::Arc};

use anyhow::Context;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            block_source_mapping::BlockSourceMapping,
            content_store::ContentStore,
            knowledge_block::{KnowledgeBlock, KnowledgeKind},
            source_data::SourceData,
        },
    },
    utils::{embedding::EmbeddingProvider, llm::LanguageModel, mime::content_type_for_path},
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, info, warn};

use crate::{
    extract::{ContentExtractor, DefaultExtractor},
    parser::{BlockParser, RawBlock, SplitterBlockParser},
    prompts,
};

/// Blocks longer than this (~4k tokens) are flagged but still stored.
const BLOCK_CHAR_WARN_LIMIT: usize = 16_384;

const SITUATE_CONTEXT_MAX_TOKENS: u32 = 1_024;

/// The result of ingesting one file: the logical upload plus its extracted
/// content, whether freshly created or reused.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub source_id: String,
    pub name: String,
    pub link: String,
    pub content_type: String,
    pub content: String,
    pub attributes: serde_json::Value,
    pub reused: bool,
}

/// Content-addressed intake: one `content_store` row per unique byte stream,
/// one `source_data` row per logical upload (link).
pub struct KnowledgeIngestor {
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<EmbeddingProvider>,
    extractor: Arc<dyn ContentExtractor>,
    parser: Arc<dyn BlockParser>,
}

impl KnowledgeIngestor {
    pub fn new(llm: Arc<dyn LanguageModel>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self::with_components(
            llm,
            embedder,
            Arc::new(DefaultExtractor),
            Arc::new(SplitterBlockParser::default()),
        )
    }

    pub fn with_components(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<EmbeddingProvider>,
        extractor: Arc<dyn ContentExtractor>,
        parser: Arc<dyn BlockParser>,
    ) -> Self {
        Self {
            llm,
            embedder,
            extractor,
            parser,
        }
    }

    /// Idempotent intake of one file into the target store.
    ///
    /// Dedup happens twice: by `link` (the logical upload) and by content
    /// hash (the raw bytes). A re-upload under a known link returns the
    /// existing record untouched; identical bytes under a new link reuse the
    /// stored extraction.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn ingest(
        &self,
        store: &SurrealDbClient,
        path: &Path,
        attributes: serde_json::Value,
    ) -> Result<SourceRecord, AppError> {
        let doc_link = attributes
            .get("doc_link")
            .and_then(|v| v.as_str())
            .filter(|link| !link.is_empty())
            .map_or_else(|| path.to_string_lossy().into_owned(), str::to_owned);

        if let Some(existing) = SourceData::find_by_link(&doc_link, store).await? {
            info!(source_id = %existing.id, link = %doc_link, "source already ingested, reusing");
            let content = existing.effective_content(store).await?.unwrap_or_default();
            return Ok(SourceRecord {
                source_id: existing.id,
                name: existing.name,
                link: existing.link,
                content_type: existing.content_type,
                content,
                attributes: existing.attributes,
                reused: true,
            });
        }

        let raw = std::fs::read(path)?;
        let content_hash = ContentStore::hash_bytes(&raw);
        let content_type = content_type_for_path(path);
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| doc_link.clone());

        let content = match ContentStore::get_by_hash(&content_hash, store).await? {
            Some(existing) => {
                debug!(hash = %&content_hash[..8], "reusing content store entry");
                existing.content
            }
            None => {
                let extracted = self.extractor.extract(path, &content_type)?;
                store
                    .store_item(ContentStore::new(
                        content_hash.clone(),
                        name.clone(),
                        doc_link.clone(),
                        extracted.clone(),
                        raw.len() as u64,
                        content_type.clone(),
                    ))
                    .await?;
                debug!(hash = %&content_hash[..8], "created content store entry");
                extracted
            }
        };

        let source = SourceData::new(
            name,
            doc_link,
            content_type,
            content_hash,
            attributes,
        );
        let stored = store
            .store_item(source)
            .await?
            .ok_or_else(|| AppError::InternalError("source row was not created".into()))?;
        info!(source_id = %stored.id, link = %stored.link, "source data created");

        Ok(SourceRecord {
            source_id: stored.id,
            name: stored.name,
            link: stored.link,
            content_type: stored.content_type,
            content,
            attributes: stored.attributes,
            reused: false,
        })
    }

    /// Split a source's extracted content into knowledge blocks, deduplicated
    /// by hash, each situated in its document and embedded. Mappings to the
    /// source are always ensured, including for reused blocks.
    #[tracing::instrument(skip_all, fields(%source_id))]
    pub async fn split_blocks(
        &self,
        store: &SurrealDbClient,
        source_id: &str,
    ) -> Result<Vec<KnowledgeBlock>, AppError> {
        let source = store
            .get_item::<SourceData>(source_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("source {source_id}")))?;

        let existing_mappings = BlockSourceMapping::for_source(source_id, store).await?;
        if !existing_mappings.is_empty() {
            info!(
                count = existing_mappings.len(),
                "knowledge blocks already exist for source"
            );
            let mut blocks = Vec::with_capacity(existing_mappings.len());
            for mapping in existing_mappings {
                if let Some(block) = store.get_item::<KnowledgeBlock>(&mapping.block_id).await? {
                    blocks.push(block);
                }
            }
            return Ok(blocks);
        }

        let Some(full_content) = source.effective_content(store).await? else {
            warn!("no content found for source");
            return Ok(Vec::new());
        };

        let mut blocks = self
            .parser
            .parse(&full_content, &source.name, &source.content_type)
            .unwrap_or_else(|err| {
                warn!(error = %err, "block parsing failed, falling back to a single block");
                Vec::new()
            });
        if blocks.is_empty() {
            blocks.push(RawBlock {
                name: source.name.clone(),
                content: full_content.clone(),
                position: 1,
            });
        }

        let mut stored_blocks = Vec::with_capacity(blocks.len());

        for block in blocks {
            if block.content.chars().count() > BLOCK_CHAR_WARN_LIMIT {
                warn!(
                    block = %block.name,
                    chars = block.content.chars().count(),
                    "block exceeds the size threshold, consider restructuring"
                );
            }

            let context = self.situate_block(&full_content, &block).await;
            let hash = KnowledgeBlock::block_hash(&block.name, &block.content, context.as_deref());

            let knowledge_block = match KnowledgeBlock::find_by_hash(&hash, store).await? {
                Some(existing) => {
                    debug!(block = %block.name, "knowledge block already exists");
                    existing
                }
                None => {
                    let embedding_input = context.as_ref().map_or_else(
                        || block.content.clone(),
                        |ctx| format!("<context>\n{ctx}</context>\n\n{}", block.content),
                    );
                    let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
                    let embedding = Retry::spawn(retry_strategy, || {
                        self.embedder.embed(&embedding_input)
                    })
                    .await
                    .context("generating embedding for knowledge block")?;

                    let created = KnowledgeBlock::new(
                        block.name.clone(),
                        context.clone(),
                        block.content.clone(),
                        KnowledgeKind::Paragraph,
                        hash,
                        embedding,
                        serde_json::json!({ "position": block.position }),
                    );
                    store
                        .store_item(created)
                        .await?
                        .ok_or_else(|| AppError::InternalError("block row was not created".into()))?
                }
            };

            BlockSourceMapping::ensure(&knowledge_block.id, source_id, block.position, store)
                .await?;
            stored_blocks.push(knowledge_block);
        }

        info!(count = stored_blocks.len(), "knowledge blocks processed");
        Ok(stored_blocks)
    }

    /// One LLM call placing the block inside the whole document. Failures
    /// degrade to an un-situated block rather than failing the split.
    async fn situate_block(&self, full_content: &str, block: &RawBlock) -> Option<String> {
        let prompt = prompts::situate_context_prompt(full_content, &block.content);
        match self.llm.generate(&prompt, SITUATE_CONTEXT_MAX_TOKENS).await {
            Ok(context) => Some(context.trim().to_string()),
            Err(err) => {
                warn!(block = %block.name, error = %err, "failed to generate situated context");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::llm::ScriptedModel;
    use serde_json::json;
    use std::io::Write;
    use uuid::Uuid;

    fn ingestor() -> KnowledgeIngestor {
        let llm = ScriptedModel::new().fallback("a situating sentence");
        KnowledgeIngestor::new(
            Arc::new(llm),
            Arc::new(EmbeddingProvider::new_hashed(8)),
        )
    }

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    fn write_doc(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create file");
        file.write_all(body.as_bytes()).expect("write file");
        path
    }

    #[tokio::test]
    async fn ingest_then_reupload_by_link_reuses_the_source() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_doc(&dir, "doc.md", "# Title\n\nSome body text.");
        let ingestor = ingestor();

        let first = ingestor
            .ingest(&db, &path, json!({"doc_link": "link-1", "topic_name": "demo"}))
            .await
            .expect("first ingest");
        assert!(!first.reused);
        assert_eq!(first.content_type, "text/markdown");

        let second = ingestor
            .ingest(&db, &path, json!({"doc_link": "link-1"}))
            .await
            .expect("second ingest");
        assert!(second.reused);
        assert_eq!(second.source_id, first.source_id);

        let sources: Vec<SourceData> = db.get_all_stored_items().await.expect("sources");
        assert_eq!(sources.len(), 1);
    }

    #[tokio::test]
    async fn identical_bytes_under_new_link_share_the_content_row() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_doc(&dir, "doc.md", "identical bytes");
        let ingestor = ingestor();

        let first = ingestor
            .ingest(&db, &path, json!({"doc_link": "link-1"}))
            .await
            .expect("first ingest");
        let second = ingestor
            .ingest(&db, &path, json!({"doc_link": "link-2"}))
            .await
            .expect("second ingest");

        assert_ne!(first.source_id, second.source_id);

        let sources: Vec<SourceData> = db.get_all_stored_items().await.expect("sources");
        let contents: Vec<ContentStore> = db.get_all_stored_items().await.expect("contents");
        assert_eq!(sources.len(), 2);
        assert_eq!(contents.len(), 1);
    }

    #[tokio::test]
    async fn split_blocks_dedups_by_hash_and_always_maps() {
        let db = memory_db().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_doc(&dir, "doc.txt", "A sentence of knowledge.");
        let ingestor = ingestor();

        let record = ingestor
            .ingest(&db, &path, json!({"doc_link": "link-1"}))
            .await
            .expect("ingest");

        let blocks = ingestor
            .split_blocks(&db, &record.source_id)
            .await
            .expect("split blocks");
        assert!(!blocks.is_empty());
        assert!(blocks[0].context.is_some());

        // Second run returns the same blocks without creating new rows.
        let again = ingestor
            .split_blocks(&db, &record.source_id)
            .await
            .expect("split again");
        assert_eq!(
            blocks.iter().map(|b| b.id.clone()).collect::<Vec<_>>(),
            again.iter().map(|b| b.id.clone()).collect::<Vec<_>>()
        );

        let all_blocks: Vec<KnowledgeBlock> = db.get_all_stored_items().await.expect("blocks");
        assert_eq!(all_blocks.len(), blocks.len());

        let mappings = BlockSourceMapping::for_source(&record.source_id, &db)
            .await
            .expect("mappings");
        assert_eq!(mappings.len(), blocks.len());
    }
}
