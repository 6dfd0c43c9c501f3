mod answer;
mod config;
mod document;
mod format;
mod vector;

pub use answer::{Answer, AnswerEvent, NO_CONTEXT_ANSWER, QueryRecord, SourceRef};
pub use config::{
    ChunkStrategy, CompletionConfig, Config, DEFAULT_COMPLETION_MODEL, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_MAX_FILE_SIZE, DEFAULT_OPENAI_URL, DEFAULT_OWNER, DEFAULT_QDRANT_URL, EmbeddingConfig,
    IngestionConfig, LoggingConfig, MetadataConfig, MetadataDriver, PostgresVectorConfig,
    QueryConfig, S3Config, StorageConfig, StorageDriver, VectorDriver, VectorStoreConfig,
    WatcherConfig, known_model_dimension,
};
pub use document::{Document, IngestOutcome};
pub use format::OutputFormat;
pub use vector::{ChunkPayload, ScoredRecord, VectorRecord};
