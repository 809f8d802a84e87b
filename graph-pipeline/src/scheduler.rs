use std::{sync::Arc, time::Duration};

use common::{
    error::AppError,
    storage::{
        registry::StoreRegistry,
        types::{
            graph_build_status::{BuildStatus, GraphBuildStatus},
            source_data::SourceData,
        },
    },
};
use tokio::{sync::watch, time::sleep};
use tracing::{error, info, warn};

use crate::builder::GraphBuilder;

/// What one scheduler poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub topic_name: String,
    pub external_database_uri: String,
    pub source_ids: Vec<String>,
    pub status: BuildStatus,
}

/// The single background worker that drains `(topic, tenant)` build queues.
///
/// One job at a time, strict FIFO by `scheduled_at`. Rows advance
/// `pending → processing → {completed, failed}` in the local store, mirrored
/// into the tenant store at the terminal transition. The selector includes
/// `processing`, so a job interrupted mid-build is picked up again on the
/// next poll; idempotency lives in the extraction guard and the relationship
/// identity key.
pub struct BuildScheduler {
    registry: Arc<StoreRegistry>,
    builder: Arc<GraphBuilder>,
    check_interval: Duration,
}

impl BuildScheduler {
    pub fn new(
        registry: Arc<StoreRegistry>,
        builder: Arc<GraphBuilder>,
        check_interval: Duration,
    ) -> Self {
        Self {
            registry,
            builder,
            check_interval,
        }
    }

    /// Run until the shutdown channel fires. Poll failures are logged and the
    /// loop keeps going; a broken poll must not kill the daemon.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.check_interval.as_secs(),
            "graph build scheduler started"
        );

        loop {
            tokio::select! {
                _ = sleep(self.check_interval) => {
                    match self.poll_once().await {
                        Ok(Some(outcome)) => {
                            info!(
                                topic = %outcome.topic_name,
                                sources = outcome.source_ids.len(),
                                status = ?outcome.status,
                                "build job finished"
                            );
                        }
                        Ok(None) => {}
                        Err(err) => {
                            error!(error = %err, "error in scheduler poll");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("graph build scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Process the earliest open job, if any. Exposed separately so tests and
    /// one-shot tools can drive the queue without the timer.
    pub async fn poll_once(&self) -> Result<Option<JobOutcome>, AppError> {
        let local = self.registry.local();

        let Some(earliest) = GraphBuildStatus::earliest_open(&local).await? else {
            return Ok(None);
        };
        let topic_name = earliest.topic_name.clone();
        let tenant_uri = earliest.external_database_uri.clone();

        let batch = GraphBuildStatus::open_for_job(&topic_name, &tenant_uri, &local).await?;
        let source_ids: Vec<String> = batch.iter().map(|row| row.source_id.clone()).collect();
        info!(
            topic = %topic_name,
            sources = source_ids.len(),
            tenant = if tenant_uri.is_empty() { "local" } else { "external" },
            "processing earliest build job"
        );

        GraphBuildStatus::mark_many(
            &topic_name,
            &source_ids,
            &tenant_uri,
            BuildStatus::Processing,
            None,
            &local,
        )
        .await?;

        let tenant = match self.registry.get(&tenant_uri).await {
            Ok(tenant) => tenant,
            Err(err) => {
                let message = format!("tenant store unavailable: {err}");
                self.finalize(
                    &topic_name,
                    &source_ids,
                    &tenant_uri,
                    BuildStatus::Failed,
                    Some(message),
                )
                .await;
                return Ok(Some(JobOutcome {
                    topic_name,
                    external_database_uri: tenant_uri,
                    source_ids,
                    status: BuildStatus::Failed,
                }));
            }
        };

        let documents = SourceData::fetch_documents(&source_ids, &tenant).await?;
        if documents.is_empty() {
            warn!(topic = %topic_name, "no valid sources found");
            self.finalize(
                &topic_name,
                &source_ids,
                &tenant_uri,
                BuildStatus::Failed,
                Some("No valid sources found".to_string()),
            )
            .await;
            return Ok(Some(JobOutcome {
                topic_name,
                external_database_uri: tenant_uri,
                source_ids,
                status: BuildStatus::Failed,
            }));
        }

        let status = match self.builder.build(&tenant, &topic_name, &documents).await {
            Ok(report) => {
                info!(
                    topic = %topic_name,
                    entities = report.entities_created,
                    relationships = report.relationships_created,
                    "graph build succeeded"
                );
                self.finalize(&topic_name, &source_ids, &tenant_uri, BuildStatus::Completed, None)
                    .await;
                BuildStatus::Completed
            }
            Err(err) => {
                let message = format!("Graph build failed: {err}");
                error!(topic = %topic_name, error = %err, "graph build failed");
                self.finalize(
                    &topic_name,
                    &source_ids,
                    &tenant_uri,
                    BuildStatus::Failed,
                    Some(message),
                )
                .await;
                BuildStatus::Failed
            }
        };

        Ok(Some(JobOutcome {
            topic_name,
            external_database_uri: tenant_uri,
            source_ids,
            status,
        }))
    }

    /// Write the terminal status into the local store and, for external
    /// tenants, into the tenant store (where rows carry an empty URI).
    /// Failures here are logged, not raised: the build itself may have
    /// succeeded.
    async fn finalize(
        &self,
        topic_name: &str,
        source_ids: &[String],
        tenant_uri: &str,
        status: BuildStatus,
        error_message: Option<String>,
    ) {
        let local = self.registry.local();
        if let Err(err) = GraphBuildStatus::mark_many(
            topic_name,
            source_ids,
            tenant_uri,
            status,
            error_message.clone(),
            &local,
        )
        .await
        {
            error!(error = %err, "failed to update local task status");
        }

        if self.registry.is_local(tenant_uri) {
            return;
        }

        match self.registry.get(tenant_uri).await {
            Ok(tenant) => {
                if let Err(err) = GraphBuildStatus::mark_many(
                    topic_name,
                    source_ids,
                    "",
                    status,
                    error_message,
                    &tenant,
                )
                .await
                {
                    error!(error = %err, "failed to update tenant task status");
                }
            }
            Err(err) => {
                error!(error = %err, "tenant store unreachable while finalizing status");
            }
        }
    }
}
