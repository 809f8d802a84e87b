use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Closed sentiment vocabulary carried in relationship attributes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "positive" => Self::Positive,
            "negative" => Self::Negative,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

/// Closed confidence vocabulary carried in relationship attributes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

stored_object!(GraphRelationship, "graph_relationship", {
    source_entity_id: String,
    target_entity_id: String,
    relationship_desc: String,
    desc_embedding: Vec<f32>,
    attributes: serde_json::Value
});

impl GraphRelationship {
    pub fn new(
        source_entity_id: String,
        target_entity_id: String,
        relationship_desc: String,
        desc_embedding: Vec<f32>,
        attributes: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_entity_id,
            target_entity_id,
            relationship_desc,
            desc_embedding,
            attributes,
        }
    }

    /// Relationship identity within a tenant is `(src, tgt, desc)`.
    pub async fn find_by_identity(
        source_entity_id: &str,
        target_entity_id: &str,
        relationship_desc: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE source_entity_id = $src
                   AND target_entity_id = $tgt
                   AND relationship_desc = $desc
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("src", source_entity_id.to_string()))
            .bind(("tgt", target_entity_id.to_string()))
            .bind(("desc", relationship_desc.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn fetch_by_ids(ids: &[String], db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut relationships = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(relationship) = db.get_item::<Self>(id).await? {
                relationships.push(relationship);
            }
        }
        Ok(relationships)
    }

    /// All relationships touching any of the given entities, in either
    /// direction.
    pub async fn by_entity_ids(
        entity_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE source_entity_id IN $ids OR target_entity_id IN $ids",
            )
            .bind(("table", Self::table_name()))
            .bind(("ids", entity_ids))
            .await?;
        Ok(response.take(0)?)
    }

    /// Replace the description and its embedding; attributes and identity
    /// endpoints stay untouched.
    pub async fn apply_refinement(
        id: &str,
        relationship_desc: &str,
        desc_embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing($table, $id) SET
                relationship_desc = $desc,
                desc_embedding = $embedding,
                updated_at = time::now()",
        )
        .bind(("table", Self::table_name()))
        .bind(("id", id.to_string()))
        .bind(("desc", relationship_desc.to_string()))
        .bind(("embedding", desc_embedding))
        .await?
        .check()?;
        Ok(())
    }

    /// Shallow-merge new keys into the attribute bag.
    pub async fn merge_attributes(
        id: &str,
        new_attributes: &serde_json::Value,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let Some(existing) = db.get_item::<Self>(id).await? else {
            return Err(AppError::NotFound(format!("relationship {id}")));
        };

        let mut merged = existing.attributes.clone();
        if let (Some(target), Some(source)) = (merged.as_object_mut(), new_attributes.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }

        db.query("UPDATE type::thing($table, $id) SET attributes = $attributes, updated_at = time::now()")
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("attributes", merged))
            .await?
            .check()?;
        Ok(())
    }

    pub fn topic_name(&self) -> Option<&str> {
        self.attributes.get("topic_name").and_then(|v| v.as_str())
    }

    pub fn sentiment(&self) -> Sentiment {
        self.attributes
            .get("sentiment")
            .and_then(|v| v.as_str())
            .map_or(Sentiment::Neutral, Sentiment::parse)
    }

    pub fn confidence(&self) -> Confidence {
        self.attributes
            .get("confidence")
            .and_then(|v| v.as_str())
            .map_or(Confidence::Medium, Confidence::parse)
    }
}
