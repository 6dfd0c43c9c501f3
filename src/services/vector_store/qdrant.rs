//! Qdrant vector store backend implementation.

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointId, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Qdrant, QdrantError};
use std::collections::HashMap;

use super::{VectorStore, collection_name};
use crate::error::VectorStoreError;
use crate::models::{ChunkPayload, ScoredRecord, VectorDriver, VectorRecord, VectorStoreConfig};

/// Qdrant vector store backend; one collection per owner.
pub struct QdrantBackend {
    client: Qdrant,
    prefix: Option<String>,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            prefix: config.collection_prefix.clone(),
        })
    }

    fn collection(&self, owner: &str) -> String {
        collection_name(self.prefix.as_deref(), owner)
    }

    async fn exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(|e| classify(e, VectorStoreError::CollectionError))
    }

    fn document_filter(document_id: &str) -> Filter {
        Filter::must([Condition::matches("document_id", document_id.to_string())])
    }
}

/// Transport failures become `Unavailable`; everything else keeps its operation-specific variant.
fn classify(err: QdrantError, otherwise: fn(String) -> VectorStoreError) -> VectorStoreError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("transport")
        || lower.contains("connect")
        || lower.contains("unavailable")
        || lower.contains("deadline")
    {
        VectorStoreError::Unavailable(msg)
    } else {
        otherwise(msg)
    }
}

fn payload_to_qdrant(payload: ChunkPayload) -> HashMap<String, Value> {
    let mut map: HashMap<String, Value> = HashMap::new();
    map.insert("document_id".to_string(), payload.document_id.into());
    map.insert("owner_id".to_string(), payload.owner_id.into());
    map.insert("filename".to_string(), payload.filename.into());
    map.insert("file_type".to_string(), payload.file_type.into());
    map.insert(
        "chunk_index".to_string(),
        i64::from(payload.chunk_index).into(),
    );
    map.insert("content".to_string(), payload.content.into());
    if let Some(page) = payload.page {
        map.insert("page".to_string(), i64::from(page).into());
    }
    if let Some(offset) = payload.offset {
        map.insert("offset".to_string(), (offset as i64).into());
    }
    map
}

/// Reads a stored payload, rejecting points that lack a required field.
struct PayloadReader<'a> {
    id: &'a str,
    payload: &'a HashMap<String, Value>,
}

impl PayloadReader<'_> {
    fn invalid(&self, reason: String) -> VectorStoreError {
        VectorStoreError::InvalidPayload {
            id: self.id.to_string(),
            reason,
        }
    }

    fn string(&self, key: &str) -> Result<String, VectorStoreError> {
        match self.payload.get(key).and_then(|v| v.kind.as_ref()) {
            Some(Kind::StringValue(s)) => Ok(s.clone()),
            Some(_) => Err(self.invalid(format!("field '{}' is not a string", key))),
            None => Err(self.invalid(format!("missing field '{}'", key))),
        }
    }

    fn optional_int(&self, key: &str) -> Result<Option<i64>, VectorStoreError> {
        match self.payload.get(key).and_then(|v| v.kind.as_ref()) {
            Some(Kind::IntegerValue(n)) if *n >= 0 => Ok(Some(*n)),
            Some(Kind::NullValue(_)) | None => Ok(None),
            Some(_) => Err(self.invalid(format!(
                "field '{}' is not a non-negative integer",
                key
            ))),
        }
    }

    fn int(&self, key: &str) -> Result<i64, VectorStoreError> {
        self.optional_int(key)?
            .ok_or_else(|| self.invalid(format!("missing field '{}'", key)))
    }

    fn read(&self) -> Result<ChunkPayload, VectorStoreError> {
        Ok(ChunkPayload {
            document_id: self.string("document_id")?,
            owner_id: self.string("owner_id")?,
            filename: self.string("filename")?,
            file_type: self.string("file_type")?,
            chunk_index: self.int("chunk_index")? as u32,
            content: self.string("content")?,
            page: self.optional_int("page")?.map(|p| p as u32),
            offset: self.optional_int("offset")?.map(|o| o as u64),
        })
    }
}

fn point_id_string(id: Option<&PointId>) -> String {
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))
    }

    async fn ensure_collection(&self, owner: &str, dimension: u64) -> Result<(), VectorStoreError> {
        let collection = self.collection(owner);
        if self.exists(&collection).await? {
            return Ok(());
        }

        let create = CreateCollectionBuilder::new(&collection)
            .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine));

        if let Err(e) = self.client.create_collection(create).await {
            // Lost a creation race with a concurrent ingestion for the same owner
            if e.to_string().contains("already exists") {
                return Ok(());
            }
            return Err(classify(e, VectorStoreError::CollectionError));
        }

        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &collection,
                "document_id",
                FieldType::Keyword,
            ))
            .await
            .map_err(|e| classify(e, VectorStoreError::CollectionError))?;

        tracing::info!(owner, collection = %collection, dimension, "created collection");
        Ok(())
    }

    async fn upsert(
        &self,
        owner: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| PointStruct::new(record.id, record.vector, payload_to_qdrant(record.payload)))
            .collect();

        let upsert = UpsertPointsBuilder::new(self.collection(owner), points).wait(true);

        self.client
            .upsert_points(upsert)
            .await
            .map_err(|e| classify(e, VectorStoreError::UpsertError))?;

        Ok(())
    }

    async fn search(
        &self,
        owner: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        let collection = self.collection(owner);
        if !self.exists(&collection).await? {
            return Ok(Vec::new());
        }

        let search = SearchPointsBuilder::new(&collection, vector, limit).with_payload(true);

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| classify(e, VectorStoreError::SearchError))?;

        response
            .result
            .into_iter()
            .map(|point| {
                let id = point_id_string(point.id.as_ref());
                let payload = PayloadReader {
                    id: &id,
                    payload: &point.payload,
                }
                .read()?;
                Ok(ScoredRecord {
                    id,
                    score: point.score,
                    payload,
                })
            })
            .collect()
    }

    async fn delete_by_document(
        &self,
        owner: &str,
        document_id: &str,
    ) -> Result<(), VectorStoreError> {
        let collection = self.collection(owner);
        if !self.exists(&collection).await? {
            return Ok(());
        }

        let delete = DeletePointsBuilder::new(&collection)
            .points(Self::document_filter(document_id))
            .wait(true);

        self.client
            .delete_points(delete)
            .await
            .map_err(|e| classify(e, VectorStoreError::DeleteError))?;

        Ok(())
    }

    async fn count_by_document(
        &self,
        owner: &str,
        document_id: &str,
    ) -> Result<u64, VectorStoreError> {
        let collection = self.collection(owner);
        if !self.exists(&collection).await? {
            return Ok(0);
        }

        let count = CountPointsBuilder::new(&collection)
            .filter(Self::document_filter(document_id))
            .exact(true);

        let response = self
            .client
            .count(count)
            .await
            .map_err(|e| classify(e, VectorStoreError::CountError))?;

        Ok(response.result.map_or(0, |r| r.count))
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::Qdrant
    }
}
