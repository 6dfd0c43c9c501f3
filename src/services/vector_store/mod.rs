//! Vector store abstraction layer.
//!
//! Every owner gets an isolated collection; all operations are scoped by owner
//! and never touch another owner's collection. Backends (Qdrant,
//! PostgreSQL/pgvector) are selected by configuration.

mod pgvector;
mod qdrant;

pub use pgvector::PgVectorBackend;
pub use qdrant::QdrantBackend;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::VectorStoreError;
use crate::models::{ScoredRecord, VectorDriver, VectorRecord, VectorStoreConfig};

/// PostgreSQL silently truncates identifiers past this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Hex characters of the owner digest used to disambiguate names.
const DIGEST_LEN: usize = 8;

/// First `DIGEST_LEN` hex characters of the SHA-256 of `value`.
pub(crate) fn short_digest(value: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(value.as_bytes()));
    digest.truncate(DIGEST_LEN);
    digest
}

/// Per-owner similarity index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check if the vector store is healthy and accessible.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Create the owner's collection if it does not exist yet (cosine metric).
    async fn ensure_collection(&self, owner: &str, dimension: u64) -> Result<(), VectorStoreError>;

    /// Insert or overwrite records by id. Empty input is a no-op.
    async fn upsert(&self, owner: &str, records: Vec<VectorRecord>)
    -> Result<(), VectorStoreError>;

    /// Up to `limit` nearest records by descending score. A missing collection yields no results.
    async fn search(
        &self,
        owner: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError>;

    /// Remove every record of one document from the owner's collection.
    async fn delete_by_document(&self, owner: &str, document_id: &str)
    -> Result<(), VectorStoreError>;

    /// Exact number of records stored for one document.
    async fn count_by_document(&self, owner: &str, document_id: &str)
    -> Result<u64, VectorStoreError>;

    fn driver(&self) -> VectorDriver;
}

/// Collection name for an owner: `[{prefix}_]user_{owner}_docs`.
///
/// The owner id is lower-cased and every character outside `[a-z0-9_]` becomes
/// `_`. When that changes the id, or the name would exceed
/// [`MAX_IDENTIFIER_LEN`], the name is cut down and a hash of the raw id is
/// placed right before `_docs`, so distinct owners never share a collection.
pub fn collection_name(prefix: Option<&str>, owner: &str) -> String {
    let sanitized: String = owner
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut head = match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}_user_{}", prefix, sanitized),
        None => format!("user_{}", sanitized),
    };

    let plain_len = head.len() + "_docs".len();
    if sanitized == owner && plain_len <= MAX_IDENTIFIER_LEN {
        return format!("{}_docs", head);
    }

    let tail = format!("_{}_docs", short_digest(owner));
    while head.len() + tail.len() > MAX_IDENTIFIER_LEN {
        head.pop();
    }
    format!("{}{}", head, tail)
}

/// Create a vector store backend based on configuration.
pub async fn create_vector_store(
    config: &VectorStoreConfig,
) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.driver {
        VectorDriver::Qdrant => {
            let backend = QdrantBackend::new(config)?;
            Ok(Arc::new(backend))
        }
        VectorDriver::PostgreSQL => {
            let backend = PgVectorBackend::new(config).await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_plain_owner() {
        assert_eq!(collection_name(None, "alice"), "user_alice_docs");
        assert_eq!(collection_name(None, "local_user_1"), "user_local_user_1_docs");
    }

    #[test]
    fn test_collection_name_sanitized_owner_gets_suffix() {
        let name = collection_name(None, "local-user");
        assert!(name.starts_with("user_local_user_"));
        assert!(name.ends_with("_docs"));
        assert_ne!(name, collection_name(None, "local_user"));
    }

    #[test]
    fn test_collection_name_case_does_not_collide() {
        assert_ne!(collection_name(None, "Alice"), collection_name(None, "alice"));
        assert!(
            collection_name(None, "Bob@Example.com")
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        );
    }

    #[test]
    fn test_collection_name_long_owner_is_bounded() {
        let owner = "a".repeat(200);
        let name = collection_name(None, &owner);
        assert!(name.len() <= MAX_IDENTIFIER_LEN);
        assert_ne!(name, collection_name(None, &"a".repeat(201)));
    }

    #[test]
    fn test_collection_name_long_prefix_keeps_hash() {
        let prefix = "tenant_production_eu_west";
        let owners = [
            format!("{}_one", "x".repeat(40)),
            format!("{}_two", "x".repeat(40)),
        ];
        let names: Vec<String> = owners
            .iter()
            .map(|owner| collection_name(Some(prefix), owner))
            .collect();

        for (owner, name) in owners.iter().zip(&names) {
            assert!(name.len() <= MAX_IDENTIFIER_LEN, "{} too long", name);
            assert!(name.starts_with("tenant_production_eu_west_user_"));
            assert!(name.ends_with(&format!("_{}_docs", short_digest(owner))));
        }
        assert_ne!(names[0], names[1]);

        // a prefix that alone fills the limit still leaves the hash intact
        let name = collection_name(Some(&"p".repeat(80)), "alice");
        assert_eq!(name.len(), MAX_IDENTIFIER_LEN);
        assert!(name.ends_with(&format!("_{}_docs", short_digest("alice"))));
    }

    #[test]
    fn test_collection_name_prefix() {
        assert_eq!(collection_name(Some("prod"), "bob"), "prod_user_bob_docs");
        assert_eq!(collection_name(Some(""), "bob"), "user_bob_docs");
    }
}
