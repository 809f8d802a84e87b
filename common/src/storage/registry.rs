use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{error::AppError, utils::config::AppConfig};

use super::db::SurrealDbClient;

/// Process-wide map of tenant database URI → connected client.
///
/// The local store is opened eagerly at startup; tenant stores are connected
/// lazily on first access, get their schema initialized, and are cached for
/// the lifetime of the process. The map is read-mostly; writes take the lock
/// only while inserting a freshly connected client.
pub struct StoreRegistry {
    local_uri: String,
    local: Arc<SurrealDbClient>,
    username: String,
    password: String,
    namespace: String,
    database: String,
    embedding_dimensions: usize,
    tenants: RwLock<HashMap<String, Arc<SurrealDbClient>>>,
}

impl StoreRegistry {
    pub async fn new(config: &AppConfig, embedding_dimensions: usize) -> Result<Self, AppError> {
        let local = SurrealDbClient::open(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await
        .map_err(|e| AppError::StoreUnavailable(format!("local store: {e}")))?;

        local.ensure_initialized(embedding_dimensions).await?;
        info!(address = %config.surrealdb_address, "local store initialized");

        Ok(Self {
            local_uri: config.surrealdb_address.clone(),
            local: Arc::new(local),
            username: config.surrealdb_username.clone(),
            password: config.surrealdb_password.clone(),
            namespace: config.surrealdb_namespace.clone(),
            database: config.surrealdb_database.clone(),
            embedding_dimensions,
            tenants: RwLock::new(HashMap::new()),
        })
    }

    /// Wrap an already-open client as the local store. Used by tests and by
    /// processes that manage their own connection.
    pub fn with_local(local: Arc<SurrealDbClient>, embedding_dimensions: usize) -> Self {
        Self {
            local_uri: String::new(),
            local,
            username: String::new(),
            password: String::new(),
            namespace: "narrative".to_string(),
            database: "knowledge".to_string(),
            embedding_dimensions,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> Arc<SurrealDbClient> {
        Arc::clone(&self.local)
    }

    /// True when `uri` addresses the local store: unset, empty, or equal to
    /// the local address.
    pub fn is_local(&self, uri: &str) -> bool {
        uri.is_empty() || uri == self.local_uri
    }

    /// Resolve a client for `uri`, connecting and initializing schema on
    /// first access.
    pub async fn get(&self, uri: &str) -> Result<Arc<SurrealDbClient>, AppError> {
        if self.is_local(uri) {
            debug!("using local store");
            return Ok(self.local());
        }

        if let Some(existing) = self.tenants.read().await.get(uri) {
            return Ok(Arc::clone(existing));
        }

        let client = SurrealDbClient::open(
            uri,
            &self.username,
            &self.password,
            &self.namespace,
            &self.database,
        )
        .await
        .map_err(|e| AppError::StoreUnavailable(format!("tenant store {uri}: {e}")))?;

        client
            .ensure_initialized(self.embedding_dimensions)
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("tenant schema {uri}: {e}")))?;

        let client = Arc::new(client);
        let mut tenants = self.tenants.write().await;
        // A racing connect may have inserted first; keep the existing one.
        let entry = tenants
            .entry(uri.to_string())
            .or_insert_with(|| Arc::clone(&client));
        info!(%uri, "tenant store connected");
        Ok(Arc::clone(entry))
    }

    /// Prove the store behind `uri` answers a trivial query.
    pub async fn validate(&self, uri: &str) -> Result<(), AppError> {
        let client = self.get(uri).await?;
        client
            .validate()
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("validation failed for {uri}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_registry() -> StoreRegistry {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        StoreRegistry::with_local(Arc::new(db), 3)
    }

    #[tokio::test]
    async fn empty_uri_is_local() {
        let registry = memory_registry().await;
        assert!(registry.is_local(""));
        assert!(!registry.is_local("ws://elsewhere:8000"));
    }

    #[tokio::test]
    async fn get_with_empty_uri_returns_local_store() {
        let registry = memory_registry().await;
        let store = registry.get("").await.expect("local store should resolve");
        assert!(Arc::ptr_eq(&store, &registry.local()));
    }

    #[tokio::test]
    async fn tenant_connection_is_cached() {
        let registry = memory_registry().await;
        let first = registry
            .get("mem://")
            .await
            .expect("in-memory tenant should connect");
        let second = registry
            .get("mem://")
            .await
            .expect("cached tenant should resolve");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn validate_local_store() {
        let registry = memory_registry().await;
        registry.validate("").await.expect("local store is alive");
    }

    #[tokio::test]
    async fn unreachable_tenant_surfaces_store_unavailable() {
        let registry = memory_registry().await;
        let err = registry
            .get("definitely-not-a-scheme://nowhere")
            .await
            .expect_err("bogus endpoint must fail");
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }
}
