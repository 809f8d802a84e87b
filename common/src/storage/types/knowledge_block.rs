use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    Paragraph,
    Summary,
    Insight,
}

stored_object!(KnowledgeBlock, "knowledge_block", {
    name: String,
    context: Option<String>,
    content: String,
    knowledge_type: KnowledgeKind,
    hash: String,
    embedding: Vec<f32>,
    attributes: serde_json::Value
});

impl KnowledgeBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        context: Option<String>,
        content: String,
        knowledge_type: KnowledgeKind,
        hash: String,
        embedding: Vec<f32>,
        attributes: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            context,
            content,
            knowledge_type,
            hash,
            embedding,
            attributes,
        }
    }

    /// Dedup identity: SHA-256 over `name|content|context`.
    pub fn block_hash(name: &str, content: &str, context: Option<&str>) -> String {
        let input = format!("{name}|{content}|{}", context.unwrap_or_default());
        let digest = Sha256::digest(input.as_bytes());
        format!("{digest:x}")
    }

    pub async fn find_by_hash(hash: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE hash = $hash LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("hash", hash.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }
}
