pub mod chunker;
pub mod completion;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod metadata;
pub mod object_store;
pub mod query;
pub mod vector_store;
pub mod watcher;

pub use chunker::{TextChunk, TextChunker};
pub use completion::{ChatMessage, CompletionClient, CompletionProvider, CompletionStream};
pub use embedding::{Embedder, EmbeddingClient};
pub use extract::{PlainTextExtractor, TextExtractor};
pub use ingest::{IngestService, OrphanedDocument, ReconcileReport};
pub use metadata::{MetadataStore, create_metadata_store};
pub use object_store::{LocalObjectStore, ObjectStore, S3ObjectStore, create_object_store};
pub use query::QueryService;
pub use vector_store::{VectorStore, collection_name, create_vector_store};
pub use watcher::{SyncReport, Watcher};
