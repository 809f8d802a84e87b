use async_openai::error::OpenAIError;
use thiserror::Error;

/// Core internal errors. The variants form the closed taxonomy shared by the
/// ingestion surface, the build scheduler and the optimizer.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("LLM JSON parsing error: {0}")]
    JsonParse(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Graph build error: {0}")]
    Build(String),
    #[error("Optimizer error: {0}")]
    Optimizer(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// True for transport-level failures worth a bounded retry against the
    /// tenant store. Only this class is retried; everything else propagates.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::ConnectionLost(_) => true,
            Self::Database(err) => {
                let text = err.to_string().to_lowercase();
                text.contains("connection")
                    && (text.contains("lost")
                        || text.contains("closed")
                        || text.contains("refused")
                        || text.contains("reset"))
            }
            _ => false,
        }
    }
}
