use std::path::Path;

use common::error::AppError;

/// Seam for file-format extractors. The built-in implementation covers the
/// accepted upload set; richer formats plug in from outside.
pub trait ContentExtractor: Send + Sync {
    /// Produce the textual content of the file at `path`.
    fn extract(&self, path: &Path, content_type: &str) -> Result<String, AppError>;
}

pub struct DefaultExtractor;

impl ContentExtractor for DefaultExtractor {
    fn extract(&self, path: &Path, content_type: &str) -> Result<String, AppError> {
        match content_type {
            "application/pdf" => pdf_extract::extract_text(path)
                .map_err(|e| AppError::Extraction(format!("pdf extraction failed: {e}"))),
            "text/markdown" | "text/plain" | "text/sql" => {
                let bytes = std::fs::read(path)
                    .map_err(|e| AppError::Extraction(format!("read failed: {e}")))?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => Err(AppError::Extraction(format!(
                "no extractor for content type {other}"
            ))),
        }
    }
}
