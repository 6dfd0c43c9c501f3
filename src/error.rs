//! Error types for the ingestion and query pipeline.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Input rejected before any I/O or network call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("owner id cannot be empty")]
    EmptyOwner,

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("file is empty")]
    EmptyFile,

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("no text content found in document")]
    NoTextContent,

    #[error("question cannot be empty")]
    EmptyQuestion,

    #[error("invalid chunking parameters: {0}")]
    InvalidChunking(String),
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("no texts to embed")]
    EmptyInput,

    #[error("embedding client misconfigured: {0}")]
    Configuration(String),

    #[error("rate limited by embedding API: {0}")]
    RateLimited(String),

    #[error("embedding API still rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        // Only rate limiting is retried; everything else fails the batch immediately
        matches!(self, EmbeddingError::RateLimited(_))
    }
}

/// Errors related to completion (answer generation) operations.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion client misconfigured: {0}")]
    Configuration(String),

    #[error("completion server error: {0}")]
    ServerError(String),

    #[error("completion request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),

    #[error("no completion choices returned")]
    NoChoices,

    #[error("completion timeout")]
    Timeout,
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("count error: {0}")]
    CountError(String),

    #[error("invalid payload on point {id}: {reason}")]
    InvalidPayload { id: String, reason: String },

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("pgvector extension not available: {0}")]
    PgVectorExtensionError(String),
}

/// Errors related to the document metadata store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("document already exists for owner {owner_id} with hash {file_hash}")]
    Conflict { owner_id: String, file_hash: String },

    #[error("metadata query failed: {0}")]
    QueryError(String),

    #[error("invalid stored row: {0}")]
    InvalidRow(String),
}

/// Errors related to object storage of raw uploads.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object storage misconfigured: {0}")]
    Configuration(String),

    #[error("object storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors from turning raw bytes into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no extractor for file type: {0}")]
    Unsupported(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Errors surfaced by document ingestion and deletion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector index error: {0}")]
    VectorIndex(#[from] VectorStoreError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("vector count mismatch for document {document_id}: expected {expected}, found {found}")]
    IncompleteIndex {
        document_id: String,
        expected: u64,
        found: u64,
    },

    #[error("file read error: {0}")]
    FileReadError(String),
}

/// Errors surfaced by the question answering engine.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector index error: {0}")]
    VectorIndex(#[from] VectorStoreError),

    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("query history error: {0}")]
    History(#[from] PersistenceError),
}

/// Errors related to the filesystem watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rate_limit_is_retryable() {
        assert!(EmbeddingError::RateLimited("429".to_string()).is_retryable());
        assert!(!EmbeddingError::ServerError("status 500".to_string()).is_retryable());
        assert!(!EmbeddingError::Timeout.is_retryable());
        assert!(!EmbeddingError::InvalidResponse("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::FileTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "file too large: 20 bytes (max 10)");
        let err = IngestError::from(ValidationError::UnsupportedFileType(".exe".to_string()));
        assert!(err.to_string().contains(".exe"));
    }
}
