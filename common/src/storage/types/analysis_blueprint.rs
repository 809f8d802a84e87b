use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(AnalysisBlueprint, "analysis_blueprint", {
    topic_name: String,
    processing_items: serde_json::Value,
    processing_instructions: String
});

impl AnalysisBlueprint {
    pub fn new(
        topic_name: String,
        processing_items: serde_json::Value,
        processing_instructions: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            topic_name,
            processing_items,
            processing_instructions,
        }
    }

    /// Blueprints are append-only; the newest row for a topic wins.
    pub async fn latest_for_topic(
        topic_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE topic_name = $topic_name ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("topic_name", topic_name.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }
}
