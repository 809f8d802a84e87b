use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(GraphEntity, "graph_entity", {
    name: String,
    description: String,
    description_embedding: Vec<f32>,
    attributes: serde_json::Value
});

impl GraphEntity {
    pub fn new(
        name: String,
        description: String,
        description_embedding: Vec<f32>,
        attributes: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            description,
            description_embedding,
            attributes,
        }
    }

    /// Entity identity within a tenant is `(name, attributes.topic_name)`.
    pub async fn find_by_name_and_topic(
        name: &str,
        topic_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE name = $name AND attributes.topic_name = $topic_name LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("name", name.to_string()))
            .bind(("topic_name", topic_name.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn fetch_by_ids(ids: &[String], db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = db.get_item::<Self>(id).await? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Overwrite name/description/attributes and the description embedding in
    /// one statement. Callers own attribute-preservation rules.
    pub async fn apply_refinement(
        id: &str,
        name: &str,
        description: &str,
        attributes: serde_json::Value,
        description_embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing($table, $id) SET
                name = $name,
                description = $description,
                attributes = $attributes,
                description_embedding = $embedding,
                updated_at = time::now()",
        )
        .bind(("table", Self::table_name()))
        .bind(("id", id.to_string()))
        .bind(("name", name.to_string()))
        .bind(("description", description.to_string()))
        .bind(("attributes", attributes))
        .bind(("embedding", description_embedding))
        .await?
        .check()?;
        Ok(())
    }

    // Typed views over the duck-typed attribute bag.

    pub fn topic_name(&self) -> Option<&str> {
        self.attributes.get("topic_name").and_then(|v| v.as_str())
    }

    pub fn category(&self) -> Option<&str> {
        self.attributes.get("category").and_then(|v| v.as_str())
    }

    pub fn aliases(&self) -> Vec<String> {
        self.attributes
            .get("aliases")
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn identity_is_name_plus_topic() {
        let db = memory_db().await;

        let acme_launch = GraphEntity::new(
            "Acme".into(),
            "Acme in the launch topic".into(),
            vec![0.0; 3],
            json!({"topic_name": "launch", "category": "narrative"}),
        );
        let acme_merger = GraphEntity::new(
            "Acme".into(),
            "Acme in the merger topic".into(),
            vec![0.0; 3],
            json!({"topic_name": "merger", "category": "narrative"}),
        );
        db.store_item(acme_launch.clone()).await.expect("store");
        db.store_item(acme_merger).await.expect("store");

        let found = GraphEntity::find_by_name_and_topic("Acme", "launch", &db)
            .await
            .expect("lookup")
            .expect("entity exists in launch topic");
        assert_eq!(found.id, acme_launch.id);

        let missing = GraphEntity::find_by_name_and_topic("Acme", "unrelated", &db)
            .await
            .expect("lookup");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn refinement_overwrites_fields_in_place() {
        let db = memory_db().await;
        let entity = GraphEntity::new(
            "TiDB".into(),
            "a database".into(),
            vec![0.1, 0.1, 0.1],
            json!({"topic_name": "demo", "category": "narrative"}),
        );
        db.store_item(entity.clone()).await.expect("store");

        GraphEntity::apply_refinement(
            &entity.id,
            "TiDB",
            "a distributed SQL database",
            json!({"topic_name": "demo", "category": "narrative", "aliases": ["TiDB Cluster"]}),
            vec![0.2, 0.2, 0.2],
            &db,
        )
        .await
        .expect("refinement");

        let updated: GraphEntity = db
            .get_item(&entity.id)
            .await
            .expect("fetch")
            .expect("entity still present");
        assert_eq!(updated.description, "a distributed SQL database");
        assert_eq!(updated.aliases(), vec!["TiDB Cluster".to_string()]);
        assert_eq!(updated.topic_name(), Some("demo"));
    }
}
