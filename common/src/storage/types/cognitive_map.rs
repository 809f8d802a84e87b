use sha2::{Digest, Sha256};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(CognitiveMap, "cognitive_map", {
    topic_name: String,
    source_id: String,
    map: serde_json::Value
});

impl CognitiveMap {
    /// One cached map per `(topic, source)`; the id is derived so re-runs
    /// land on the same row.
    pub fn record_id(topic_name: &str, source_id: &str) -> String {
        let digest = Sha256::digest(format!("{topic_name}|{source_id}").as_bytes());
        format!("{digest:x}")
    }

    pub fn new(topic_name: String, source_id: String, map: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Self::record_id(&topic_name, &source_id),
            created_at: now,
            updated_at: now,
            topic_name,
            source_id,
            map,
        }
    }

    pub async fn find(
        topic_name: &str,
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db
            .get_item::<Self>(&Self::record_id(topic_name, source_id))
            .await?)
    }

    /// Write the map, replacing any previous run's row for the same key.
    pub async fn upsert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query("UPSERT type::thing($table, $id) CONTENT $map")
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("map", self))
            .await?
            .check()?;
        Ok(())
    }
}
