use common::error::AppError;
use text_splitter::{MarkdownSplitter, TextSplitter};

/// An ordered slice of a document, before deduplication and embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub name: String,
    pub content: String,
    pub position: i64,
}

/// Seam for mime-specific block parsers.
pub trait BlockParser: Send + Sync {
    fn parse(&self, content: &str, name: &str, content_type: &str) -> Result<Vec<RawBlock>, AppError>;
}

/// Default parser: splits on semantic boundaries with `text-splitter`, using
/// the markdown-aware splitter where the content type allows it.
pub struct SplitterBlockParser {
    max_block_chars: usize,
}

impl Default for SplitterBlockParser {
    fn default() -> Self {
        Self {
            // Roughly 1k tokens per block.
            max_block_chars: 4_000,
        }
    }
}

impl SplitterBlockParser {
    pub fn new(max_block_chars: usize) -> Self {
        Self { max_block_chars }
    }
}

impl BlockParser for SplitterBlockParser {
    fn parse(&self, content: &str, name: &str, content_type: &str) -> Result<Vec<RawBlock>, AppError> {
        let chunks: Vec<String> = if content_type == "text/markdown" {
            MarkdownSplitter::new(self.max_block_chars)
                .chunks(content)
                .map(str::to_owned)
                .collect()
        } else {
            TextSplitter::new(self.max_block_chars)
                .chunks(content)
                .map(str::to_owned)
                .collect()
        };

        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| RawBlock {
                name: format!("{name} §{}", index + 1),
                content: chunk,
                position: i64::try_from(index).unwrap_or(i64::MAX) + 1,
            })
            .collect())
    }
}
