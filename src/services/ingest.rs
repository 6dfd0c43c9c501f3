//! Document ingestion: validation, dedup, chunk/embed, ordered persistence with compensation.

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use super::chunker::{TextChunk, TextChunker};
use super::embedding::Embedder;
use super::extract::TextExtractor;
use super::metadata::MetadataStore;
use super::object_store::ObjectStore;
use super::vector_store::VectorStore;
use crate::error::{IngestError, PersistenceError, ValidationError};
use crate::models::{ChunkPayload, Document, IngestOutcome, IngestionConfig, VectorRecord};
use crate::utils::{calculate_checksum, is_allowed_extension, normalized_extension};

/// A document whose stored vector count disagrees with its chunk count.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanedDocument {
    pub document: Document,
    pub expected: u64,
    pub found: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub orphans: Vec<OrphanedDocument>,
    pub repaired: usize,
}

/// Orchestrates ingestion and deletion across the object, metadata and vector stores.
#[derive(Clone)]
pub struct IngestService {
    config: IngestionConfig,
    chunker: TextChunker,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn TextExtractor>,
    writes: PendingWrites,
}

/// Which persistence steps have completed and must be undone on failure.
#[derive(Debug, Default)]
struct Progress {
    object: bool,
    row: bool,
    vectors: bool,
}

/// `(owner, hash)` pairs this process is currently persisting, with a count per pair.
#[derive(Clone, Default)]
struct PendingWrites(Arc<Mutex<HashMap<String, usize>>>);

impl PendingWrites {
    fn key(owner: &str, file_hash: &str) -> String {
        format!("{}:{}", owner, file_hash)
    }

    fn contains(&self, owner: &str, file_hash: &str) -> bool {
        let map = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        map.contains_key(&Self::key(owner, file_hash))
    }

    /// Register a write; released when the guard drops, including on cancellation.
    fn begin(&self, owner: &str, file_hash: &str) -> PendingWrite {
        let key = Self::key(owner, file_hash);
        *self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert(0) += 1;
        PendingWrite {
            writes: self.clone(),
            key,
        }
    }
}

struct PendingWrite {
    writes: PendingWrites,
    key: String,
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        let mut map = self.writes.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = map.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                map.remove(&self.key);
            }
        }
    }
}

impl IngestService {
    pub fn new(
        config: IngestionConfig,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self, ValidationError> {
        let chunker = TextChunker::from_config(&config)?;
        Ok(Self {
            config,
            chunker,
            embedder,
            vectors,
            metadata,
            objects,
            extractor,
            writes: PendingWrites::default(),
        })
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Check owner, filename, type and size; returns the normalized file type.
    fn validate(&self, owner: &str, filename: &str, size: u64) -> Result<String, ValidationError> {
        if owner.trim().is_empty() {
            return Err(ValidationError::EmptyOwner);
        }
        if filename.trim().is_empty()
            || filename.contains(['/', '\\'])
            || filename == "."
            || filename == ".."
            || filename.chars().any(char::is_control)
        {
            return Err(ValidationError::InvalidFilename(filename.to_string()));
        }

        let file_type = normalized_extension(filename)
            .filter(|ext| is_allowed_extension(ext, &self.config.allowed_extensions))
            .ok_or_else(|| {
                ValidationError::UnsupportedFileType(
                    normalized_extension(filename).unwrap_or_else(|| filename.to_string()),
                )
            })?;

        if size > self.config.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            });
        }
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        Ok(file_type)
    }

    /// Ingest raw bytes for an owner. Re-uploading identical bytes returns the existing document.
    pub async fn ingest(
        &self,
        owner: &str,
        bytes: &[u8],
        filename: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let file_type = self.validate(owner, filename, bytes.len() as u64)?;
        let file_hash = calculate_checksum(bytes);

        if let Some(existing) = self.metadata.find_by_hash(owner, &file_hash).await? {
            if !self.is_abandoned(&existing).await {
                tracing::info!(
                    owner,
                    filename,
                    document_id = %existing.id,
                    "duplicate upload, returning existing document"
                );
                return Ok(IngestOutcome::Duplicate(existing));
            }
            tracing::warn!(
                owner,
                document_id = %existing.id,
                "existing document was never fully indexed, replacing it"
            );
            self.remove(&existing).await?;
        }

        let text = self.extractor.extract(bytes, &file_type)?;
        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() || chunks.iter().all(|c| c.text.trim().is_empty()) {
            return Err(ValidationError::NoTextContent.into());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(texts).await?;

        let document = Document::new(
            owner,
            filename,
            file_type,
            bytes.len() as u64,
            file_hash,
            chunks.len() as u32,
        );
        let records = build_records(&document, &chunks, embeddings);

        self.persist(document, bytes, records).await
    }

    /// An existing row whose vectors disagree with its chunk count and that no
    /// write in this process is still completing, e.g. after a cancelled ingestion.
    async fn is_abandoned(&self, existing: &Document) -> bool {
        let owner = existing.owner_id.as_str();
        if self.writes.contains(owner, &existing.file_hash) {
            return false;
        }
        match self.vectors.count_by_document(owner, &existing.id).await {
            Ok(found) => found != u64::from(existing.chunk_count),
            Err(e) => {
                tracing::warn!(
                    owner,
                    document_id = %existing.id,
                    error = %e,
                    "could not verify existing document"
                );
                false
            }
        }
    }

    /// Write object, row and vectors in order, undoing completed steps on failure.
    async fn persist(
        &self,
        document: Document,
        bytes: &[u8],
        records: Vec<VectorRecord>,
    ) -> Result<IngestOutcome, IngestError> {
        let owner = document.owner_id.as_str();
        let mut progress = Progress::default();
        let _pending = self.writes.begin(owner, &document.file_hash);

        self.objects.put(&document.storage_key, bytes).await?;
        progress.object = true;

        match self.metadata.insert_document(&document).await {
            Ok(()) => progress.row = true,
            Err(PersistenceError::Conflict { .. }) => {
                return self.resolve_conflict(&document).await;
            }
            Err(e) => {
                self.compensate(&document, &progress).await;
                return Err(e.into());
            }
        }

        if let Err(e) = self.index(&document, records, &mut progress).await {
            tracing::warn!(
                owner,
                document_id = %document.id,
                error = %e,
                "indexing failed, rolling back"
            );
            self.compensate(&document, &progress).await;
            return Err(e);
        }

        tracing::info!(
            owner,
            document_id = %document.id,
            filename = %document.filename,
            chunks = document.chunk_count,
            "document ingested"
        );
        Ok(IngestOutcome::Created(document))
    }

    async fn index(
        &self,
        document: &Document,
        records: Vec<VectorRecord>,
        progress: &mut Progress,
    ) -> Result<(), IngestError> {
        let owner = document.owner_id.as_str();
        self.vectors
            .ensure_collection(owner, self.embedder.dimension())
            .await?;

        progress.vectors = true;
        if let Err(first) = self.vectors.upsert(owner, records.clone()).await {
            // Ids are deterministic, so a second attempt overwrites rather than duplicates
            tracing::warn!(owner, document_id = %document.id, error = %first, "upsert failed, retrying once");
            self.vectors.upsert(owner, records).await?;
        }

        let expected = u64::from(document.chunk_count);
        let found = self.vectors.count_by_document(owner, &document.id).await?;
        if found != expected {
            return Err(IngestError::IncompleteIndex {
                document_id: document.id.clone(),
                expected,
                found,
            });
        }
        Ok(())
    }

    /// A concurrent upload of the same bytes won the insert; defer to it.
    async fn resolve_conflict(&self, ours: &Document) -> Result<IngestOutcome, IngestError> {
        let winner = self
            .metadata
            .find_by_hash(&ours.owner_id, &ours.file_hash)
            .await?;

        match winner {
            Some(winner) => {
                if winner.storage_key != ours.storage_key
                    && let Err(e) = self.objects.delete(&ours.storage_key).await
                {
                    tracing::warn!(key = %ours.storage_key, error = %e, "failed to remove losing upload");
                }
                Ok(IngestOutcome::Duplicate(winner))
            }
            None => Err(PersistenceError::Conflict {
                owner_id: ours.owner_id.clone(),
                file_hash: ours.file_hash.clone(),
            }
            .into()),
        }
    }

    /// Undo completed steps in reverse order. Failures are logged, not returned.
    async fn compensate(&self, document: &Document, progress: &Progress) {
        let owner = document.owner_id.as_str();

        if progress.vectors
            && let Err(e) = self.vectors.delete_by_document(owner, &document.id).await
        {
            tracing::warn!(owner, document_id = %document.id, error = %e, "compensation: vector delete failed");
        }
        if progress.row
            && let Err(e) = self.metadata.delete_document(owner, &document.id).await
        {
            tracing::warn!(owner, document_id = %document.id, error = %e, "compensation: metadata delete failed");
        }
        if progress.object
            && let Err(e) = self.objects.delete(&document.storage_key).await
        {
            tracing::warn!(owner, key = %document.storage_key, error = %e, "compensation: object delete failed");
        }
    }

    /// Read a local file and ingest it under its file name.
    pub async fn ingest_path(&self, owner: &str, path: &Path) -> Result<IngestOutcome, IngestError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ValidationError::InvalidFilename(path.display().to_string()))?;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| IngestError::FileReadError(format!("{}: {}", path.display(), e)))?;
        // Type and size from file metadata; emptiness is checked once the bytes are read
        self.validate(owner, &filename, metadata.len().max(1))?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IngestError::FileReadError(format!("{}: {}", path.display(), e)))?;

        self.ingest(owner, &bytes, &filename).await
    }

    /// Delete a document and everything derived from it. Only the owner can delete.
    pub async fn delete(&self, owner: &str, document_id: &str) -> Result<Document, IngestError> {
        if owner.trim().is_empty() {
            return Err(ValidationError::EmptyOwner.into());
        }
        let document = self
            .metadata
            .get_document(owner, document_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(document_id.to_string()))?;

        self.remove(&document).await?;
        tracing::info!(owner, document_id, filename = %document.filename, "document deleted");
        Ok(document)
    }

    /// Vectors, then object, then row. Each step tolerates an already-missing target.
    async fn remove(&self, document: &Document) -> Result<(), IngestError> {
        let owner = document.owner_id.as_str();
        self.vectors.delete_by_document(owner, &document.id).await?;
        self.objects.delete(&document.storage_key).await?;
        self.metadata.delete_document(owner, &document.id).await?;
        Ok(())
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Document>, IngestError> {
        if owner.trim().is_empty() {
            return Err(ValidationError::EmptyOwner.into());
        }
        Ok(self.metadata.list_documents(owner).await?)
    }

    pub async fn get(&self, owner: &str, document_id: &str) -> Result<Document, IngestError> {
        self.metadata
            .get_document(owner, document_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(document_id.to_string()))
    }

    /// Find documents whose vectors do not match their chunk count; optionally remove them.
    pub async fn reconcile(&self, owner: &str, repair: bool) -> Result<ReconcileReport, IngestError> {
        let documents = self.list(owner).await?;
        let mut report = ReconcileReport {
            checked: documents.len(),
            ..Default::default()
        };

        for document in documents {
            let expected = u64::from(document.chunk_count);
            let found = self.vectors.count_by_document(owner, &document.id).await?;
            if found == expected {
                continue;
            }

            tracing::warn!(
                owner,
                document_id = %document.id,
                expected,
                found,
                "document index is incomplete"
            );
            if repair {
                self.remove(&document).await?;
                report.repaired += 1;
            }
            report.orphans.push(OrphanedDocument {
                document,
                expected,
                found,
            });
        }

        Ok(report)
    }
}

fn build_records(
    document: &Document,
    chunks: &[TextChunk],
    embeddings: Vec<Vec<f32>>,
) -> Vec<VectorRecord> {
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, vector)| {
            VectorRecord::new(
                vector,
                ChunkPayload {
                    document_id: document.id.clone(),
                    owner_id: document.owner_id.clone(),
                    filename: document.filename.clone(),
                    file_type: document.file_type.clone(),
                    chunk_index: chunk.index,
                    content: chunk.text.clone(),
                    page: None,
                    offset: Some(chunk.start as u64),
                },
            )
        })
        .collect()
}
