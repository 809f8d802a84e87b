use std::sync::Arc;

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{embedding::EmbeddingProvider, llm::LanguageModel},
};
use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument};

use crate::{
    config::OptimizationConfig,
    critic, detection,
    issue::{Issue, IssueState},
    resolvers::{self, Resolution},
    retrieval::VectorSearchGraphProvider,
};

/// Counters for one optimization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationReport {
    pub detected: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_issues: usize,
}

/// The four-stage optimizer: retrieval → detection → critic evaluation →
/// typed processing, with the issue state checkpointed to disk between
/// stages and after every processing batch.
pub struct GraphOptimizer {
    store: Arc<SurrealDbClient>,
    llm: Arc<dyn LanguageModel>,
    critics: Vec<(String, Arc<dyn LanguageModel>)>,
    embedder: Arc<EmbeddingProvider>,
    config: OptimizationConfig,
}

impl GraphOptimizer {
    pub fn new(
        store: Arc<SurrealDbClient>,
        llm: Arc<dyn LanguageModel>,
        critics: Vec<(String, Arc<dyn LanguageModel>)>,
        embedder: Arc<EmbeddingProvider>,
        config: OptimizationConfig,
    ) -> Self {
        Self {
            store,
            llm,
            critics,
            embedder,
            config,
        }
    }

    #[instrument(skip_all, fields(query = %query))]
    pub async fn run(&self, query: &str) -> Result<OptimizationReport, AppError> {
        let processing = &self.config.processing;
        let state_path = processing.state_file_path.clone();
        let threshold = processing.confidence_threshold;

        let mut state = IssueState::load(&state_path)?;
        let mut report = OptimizationReport::default();

        // Stages 1+2: retrieval and detection, gated on the previous round
        // having settled.
        if detection::detection_allowed(&state, threshold) {
            let provider =
                VectorSearchGraphProvider::new(processing.top_k, processing.similarity_threshold);
            let snapshot = provider
                .retrieve(query, &self.embedder, &self.store)
                .await?;

            if snapshot.relationships.is_empty() {
                info!("retrieval returned an empty subgraph, nothing to detect");
            } else {
                for issue in detection::detect_issues(self.llm.as_ref(), &snapshot).await? {
                    if state.insert_new(issue) {
                        report.detected += 1;
                    }
                }
                state.save(&state_path)?;
            }
        } else {
            info!("detection skipped: unevaluated or unprocessed issues remain");
        }

        // Stage 3: critics vote until coverage is complete.
        critic::evaluate_issues(&self.critics, &mut state, processing.max_retries, &state_path)
            .await?;

        // Stage 4: process confident, unresolved issues in bounded batches.
        let jobs: Vec<(usize, Issue)> = state
            .processable(threshold)
            .into_iter()
            .map(|index| (index, state.issues[index].clone()))
            .collect();

        for batch in jobs.chunks(processing.max_concurrent_issues.max(1)) {
            let outcomes: Vec<(usize, Result<Resolution, AppError>)> =
                stream::iter(batch.iter().map(|(index, issue)| {
                    let store = Arc::clone(&self.store);
                    let llm = Arc::clone(&self.llm);
                    let embedder = Arc::clone(&self.embedder);
                    let issue = issue.clone();
                    let index = *index;
                    async move {
                        let outcome = resolvers::process_issue(
                            &store,
                            llm.as_ref(),
                            &embedder,
                            &issue,
                        )
                        .await;
                        (index, outcome)
                    }
                }))
                .buffer_unordered(processing.max_concurrent_issues.max(1))
                .collect()
                .await;

            for (index, outcome) in outcomes {
                let Some(issue) = state.issues.get_mut(index) else {
                    continue;
                };
                match outcome {
                    Ok(Resolution::Applied) => {
                        issue.is_resolved = true;
                        report.processed += 1;
                    }
                    Ok(Resolution::Skipped) => {
                        issue.is_resolved = true;
                        report.skipped += 1;
                    }
                    Err(err) => {
                        // The issue stays pending; the next run retries it.
                        error!(
                            issue_type = issue.issue_type.as_str(),
                            error = %err,
                            "issue processing failed"
                        );
                        report.failed += 1;
                    }
                }
            }

            state.save(&state_path)?;
        }

        report.total_issues = state.issues.len();
        info!(
            detected = report.detected,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            total = report.total_issues,
            "optimization run finished"
        );
        Ok(report)
    }
}
