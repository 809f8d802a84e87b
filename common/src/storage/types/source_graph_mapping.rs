use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GraphElementType {
    Entity,
    Relationship,
}

stored_object!(SourceGraphMapping, "source_graph_mapping", {
    source_id: String,
    graph_element_id: String,
    graph_element_type: GraphElementType,
    attributes: serde_json::Value
});

impl SourceGraphMapping {
    pub fn new(
        source_id: String,
        graph_element_id: String,
        graph_element_type: GraphElementType,
        topic_name: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_id,
            graph_element_id,
            graph_element_type,
            attributes: serde_json::json!({ "topic_name": topic_name }),
        }
    }

    /// Record lineage from a source to a graph element, once. A missing or
    /// empty `source_id` (skeleton elements) is silently skipped.
    pub async fn ensure(
        source_id: &str,
        graph_element_id: &str,
        graph_element_type: GraphElementType,
        topic_name: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if source_id.is_empty() {
            return Ok(());
        }

        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE source_id = $source_id
                   AND graph_element_id = $element_id
                   AND graph_element_type = $element_type
                   AND attributes.topic_name = $topic_name
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("source_id", source_id.to_string()))
            .bind(("element_id", graph_element_id.to_string()))
            .bind(("element_type", graph_element_type))
            .bind(("topic_name", topic_name.to_string()))
            .await?;
        let existing: Vec<Self> = response.take(0)?;

        if existing.is_empty() {
            db.store_item(Self::new(
                source_id.to_string(),
                graph_element_id.to_string(),
                graph_element_type,
                topic_name,
            ))
            .await?;
        }

        Ok(())
    }

    /// The idempotency guard for triplet extraction: has this source already
    /// contributed to this topic?
    pub async fn exists_for_source_and_topic(
        source_id: &str,
        topic_name: &str,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE source_id = $source_id AND attributes.topic_name = $topic_name
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("source_id", source_id.to_string()))
            .bind(("topic_name", topic_name.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(!rows.is_empty())
    }

    pub async fn for_source_and_topic(
        source_id: &str,
        topic_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE source_id = $source_id AND attributes.topic_name = $topic_name",
            )
            .bind(("table", Self::table_name()))
            .bind(("source_id", source_id.to_string()))
            .bind(("topic_name", topic_name.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    /// All mapping rows pointing at any of the given element ids.
    pub async fn for_elements(
        element_ids: Vec<String>,
        element_type: GraphElementType,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE graph_element_id IN $ids AND graph_element_type = $element_type",
            )
            .bind(("table", Self::table_name()))
            .bind(("ids", element_ids))
            .bind(("element_type", element_type))
            .await?;
        Ok(response.take(0)?)
    }
}
