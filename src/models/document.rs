use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An uploaded document owned by a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_hash: String,
    pub storage_key: String,
    pub chunk_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Result of an ingestion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "document", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A new document was stored and indexed.
    Created(Document),
    /// The owner already has a document with the same content hash.
    Duplicate(Document),
}

impl IngestOutcome {
    pub fn document(&self) -> &Document {
        match self {
            IngestOutcome::Created(doc) | IngestOutcome::Duplicate(doc) => doc,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate(_))
    }
}

impl Document {
    /// Document id derived from the (owner, hash) unique key.
    pub fn generate_id(owner_id: &str, file_hash: &str) -> String {
        let name = format!("{}:{}", owner_id, file_hash);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// Object storage key: `{owner}/{hash}/{filename}`.
    pub fn storage_key(owner_id: &str, file_hash: &str, filename: &str) -> String {
        format!("{}/{}/{}", owner_id, file_hash, filename)
    }

    pub fn new(
        owner_id: impl Into<String>,
        filename: impl Into<String>,
        file_type: impl Into<String>,
        file_size: u64,
        file_hash: impl Into<String>,
        chunk_count: u32,
    ) -> Self {
        let owner_id = owner_id.into();
        let filename = filename.into();
        let file_hash = file_hash.into();
        Self {
            id: Self::generate_id(&owner_id, &file_hash),
            storage_key: Self::storage_key(&owner_id, &file_hash, &filename),
            owner_id,
            filename,
            file_type: file_type.into(),
            file_size,
            file_hash,
            chunk_count,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_deterministic() {
        let a = Document::generate_id("alice", "abc123");
        let b = Document::generate_id("alice", "abc123");
        let c = Document::generate_id("bob", "abc123");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_document_new() {
        let doc = Document::new("alice", "policy.md", ".md", 42, "deadbeef", 3);
        assert_eq!(doc.storage_key, "alice/deadbeef/policy.md");
        assert_eq!(doc.id, Document::generate_id("alice", "deadbeef"));
        assert_eq!(doc.chunk_count, 3);
    }

    #[test]
    fn test_ingest_outcome_serializes_status() {
        let doc = Document::new("alice", "a.txt", ".txt", 1, "h", 1);
        let json = serde_json::to_value(IngestOutcome::Duplicate(doc)).unwrap();
        assert_eq!(json["status"], "duplicate");
        assert_eq!(json["document"]["filename"], "a.txt");
    }
}
