use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::content_store::ContentStore;

stored_object!(SourceData, "source_data", {
    name: String,
    link: String,
    content_type: String,
    content_hash: String,
    attributes: serde_json::Value
});

/// A source joined with its extracted text, the unit the graph builder
/// consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    pub source_id: String,
    pub name: String,
    pub link: String,
    pub content: String,
    pub attributes: serde_json::Value,
}

impl SourceData {
    pub fn new(
        name: String,
        link: String,
        content_type: String,
        content_hash: String,
        attributes: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            link,
            content_type,
            content_hash,
            attributes,
        }
    }

    /// The logical upload is identified by its link; re-uploads under the
    /// same link reuse the existing record.
    pub async fn find_by_link(link: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE link = $link LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("link", link.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Extracted text lives in the content store, shared across uploads of
    /// identical bytes.
    pub async fn effective_content(&self, db: &SurrealDbClient) -> Result<Option<String>, AppError> {
        let content = ContentStore::get_by_hash(&self.content_hash, db).await?;
        Ok(content.map(|c| c.content))
    }

    /// Hydrate documents for a build. Sources with no extracted content are
    /// dropped with a warning; they cannot contribute triplets.
    pub async fn fetch_documents(
        ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<Vec<SourceDocument>, AppError> {
        let mut documents = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(source) = db.get_item::<Self>(id).await? else {
                tracing::warn!(source_id = %id, "source row missing, skipping");
                continue;
            };

            match source.effective_content(db).await? {
                Some(content) if !content.trim().is_empty() => {
                    documents.push(SourceDocument {
                        source_id: source.id,
                        name: source.name,
                        link: source.link,
                        content,
                        attributes: source.attributes,
                    });
                }
                _ => {
                    tracing::warn!(source_id = %id, name = %source.name, "source has no content, skipping");
                }
            }
        }

        Ok(documents)
    }
}
