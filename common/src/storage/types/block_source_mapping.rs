use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(BlockSourceMapping, "block_source_mapping", {
    block_id: String,
    source_id: String,
    position_in_source: i64
});

impl BlockSourceMapping {
    pub fn new(block_id: String, source_id: String, position_in_source: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            block_id,
            source_id,
            position_in_source,
        }
    }

    /// Create the mapping unless one already links this block to this source.
    pub async fn ensure(
        block_id: &str,
        source_id: &str,
        position_in_source: i64,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE block_id = $block_id AND source_id = $source_id LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("block_id", block_id.to_string()))
            .bind(("source_id", source_id.to_string()))
            .await?;
        let existing: Vec<Self> = response.take(0)?;

        if existing.is_empty() {
            db.store_item(Self::new(
                block_id.to_string(),
                source_id.to_string(),
                position_in_source,
            ))
            .await?;
        }

        Ok(())
    }

    pub async fn for_source(source_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE source_id = $source_id ORDER BY position_in_source ASC")
            .bind(("table", Self::table_name()))
            .bind(("source_id", source_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}
