//! Document metadata and query history persistence.

mod postgres;
mod sqlite;

pub use postgres::PostgresMetadataStore;
pub use sqlite::SqliteMetadataStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::PersistenceError;
use crate::models::{Document, MetadataConfig, MetadataDriver, QueryRecord};

/// Relational store for documents (unique per owner and content hash) and query history.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_by_hash(
        &self,
        owner_id: &str,
        file_hash: &str,
    ) -> Result<Option<Document>, PersistenceError>;

    /// Insert a new document; `Conflict` when the owner already has this hash.
    async fn insert_document(&self, document: &Document) -> Result<(), PersistenceError>;

    /// Fetch a document only if it belongs to `owner_id`.
    async fn get_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, PersistenceError>;

    /// Documents for one owner, newest first.
    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>, PersistenceError>;

    /// Delete an owner's document row. Returns whether a row was removed.
    async fn delete_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<bool, PersistenceError>;

    async fn insert_query(&self, record: &QueryRecord) -> Result<(), PersistenceError>;

    /// Most recent query records for one owner, newest first.
    async fn recent_queries(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> Result<Vec<QueryRecord>, PersistenceError>;

    fn driver(&self) -> MetadataDriver;
}

/// Create a metadata store based on configuration.
pub async fn create_metadata_store(
    config: &MetadataConfig,
) -> Result<Arc<dyn MetadataStore>, PersistenceError> {
    match config.driver {
        MetadataDriver::Sqlite => {
            let path = config.sqlite_path().ok_or_else(|| {
                PersistenceError::Unavailable("could not determine data directory".to_string())
            })?;
            Ok(Arc::new(SqliteMetadataStore::open(&path)?))
        }
        MetadataDriver::PostgreSQL => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                PersistenceError::Unavailable(
                    "metadata.database_url (or DATABASE_URL) is required".to_string(),
                )
            })?;
            Ok(Arc::new(
                PostgresMetadataStore::connect(url, config.max_connections).await?,
            ))
        }
    }
}
