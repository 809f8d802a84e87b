use std::path::PathBuf;

/// Tuning for the optimizer's processing stage.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Fan-out width for issue resolvers.
    pub max_concurrent_issues: usize,
    /// Minimum validation score an issue needs before it is processed.
    pub confidence_threshold: f64,
    /// Cosine floor for the retrieval stage.
    pub similarity_threshold: f32,
    /// How many relationships retrieval pulls per query.
    pub top_k: usize,
    /// Where the issue state is checkpointed between batches.
    pub state_file_path: PathBuf,
    /// Passes the critic stage makes before giving up on unparsable critics.
    pub max_retries: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_issues: 4,
            confidence_threshold: 0.9,
            similarity_threshold: 0.3,
            top_k: 30,
            state_file_path: PathBuf::from("./optimizer_state.json"),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptimizationConfig {
    pub processing: ProcessingConfig,
}
