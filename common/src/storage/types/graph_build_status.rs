use sha2::{Digest, Sha256};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

stored_object!(GraphBuildStatus, "graph_build_status", {
    topic_name: String,
    source_id: String,
    external_database_uri: String,
    status: BuildStatus,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    scheduled_at: DateTime<Utc>,
    error_message: Option<String>
});

impl GraphBuildStatus {
    /// One row per `(topic, source, tenant URI)` in a store; the id is
    /// derived from the key so re-enqueues land on the existing row.
    pub fn task_id(topic_name: &str, source_id: &str, external_database_uri: &str) -> String {
        let digest = Sha256::digest(
            format!("{topic_name}|{source_id}|{external_database_uri}").as_bytes(),
        );
        format!("{digest:x}")
    }

    pub fn new(topic_name: String, source_id: String, external_database_uri: String) -> Self {
        let now = Utc::now();
        Self {
            id: Self::task_id(&topic_name, &source_id, &external_database_uri),
            created_at: now,
            updated_at: now,
            topic_name,
            source_id,
            external_database_uri,
            status: BuildStatus::Pending,
            scheduled_at: now,
            error_message: None,
        }
    }

    /// Queue a build task. If the row already exists (re-upload under the
    /// same link) it is left in whatever state it reached.
    pub async fn enqueue(
        topic_name: &str,
        source_id: &str,
        external_database_uri: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let id = Self::task_id(topic_name, source_id, external_database_uri);
        if db.get_item::<Self>(&id).await?.is_some() {
            tracing::debug!(%topic_name, %source_id, "build task already queued");
            return Ok(());
        }

        db.store_item(Self::new(
            topic_name.to_string(),
            source_id.to_string(),
            external_database_uri.to_string(),
        ))
        .await?;
        Ok(())
    }

    /// The scheduler's selection query: the earliest open row across all
    /// tenants. `processing` is included so work interrupted mid-build is
    /// picked up again.
    pub async fn earliest_open(db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE status IN ['pending', 'processing']
                 ORDER BY scheduled_at ASC
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// All open rows sharing the current job key `(topic, tenant URI)`.
    pub async fn open_for_job(
        topic_name: &str,
        external_database_uri: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE status IN ['pending', 'processing']
                   AND topic_name = $topic_name
                   AND external_database_uri = $uri
                 ORDER BY scheduled_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("topic_name", topic_name.to_string()))
            .bind(("uri", external_database_uri.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Flip status for every row matching `(topic, source ∈ ids, uri)` in one
    /// statement.
    pub async fn mark_many(
        topic_name: &str,
        source_ids: &[String],
        external_database_uri: &str,
        status: BuildStatus,
        error_message: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::table($table) SET
                status = $status,
                error_message = $error_message,
                updated_at = time::now()
             WHERE topic_name = $topic_name
               AND source_id IN $source_ids
               AND external_database_uri = $uri",
        )
        .bind(("table", Self::table_name()))
        .bind(("status", status))
        .bind(("error_message", error_message))
        .bind(("topic_name", topic_name.to_string()))
        .bind(("source_ids", source_ids.to_vec()))
        .bind(("uri", external_database_uri.to_string()))
        .await?
        .check()?;
        Ok(())
    }
}
