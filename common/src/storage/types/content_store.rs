use sha2::{Digest, Sha256};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ContentStore, "content_store", {
    name: String,
    link: String,
    content: String,
    content_size: u64,
    content_type: String
});

impl ContentStore {
    /// A content row is keyed by the hex SHA-256 of the raw uploaded bytes,
    /// so one logical file is stored exactly once no matter how many source
    /// records point at it.
    pub fn new(
        content_hash: String,
        name: String,
        link: String,
        content: String,
        content_size: u64,
        content_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: content_hash,
            created_at: now,
            updated_at: now,
            name,
            link,
            content,
            content_size,
            content_type,
        }
    }

    pub fn hash_bytes(raw: &[u8]) -> String {
        let digest = Sha256::digest(raw);
        format!("{digest:x}")
    }

    pub async fn get_by_hash(
        content_hash: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(content_hash).await?)
    }
}
