//! Wires services from configuration for CLI commands.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::models::{Config, QueryConfig};
use crate::services::{
    CompletionClient, EmbeddingClient, IngestService, MetadataStore, ObjectStore,
    PlainTextExtractor, QueryService, VectorStore, create_metadata_store, create_object_store,
    create_vector_store,
};

/// Connected stores shared by every service a command needs.
pub struct AppContext {
    pub config: Config,
    pub vectors: Arc<dyn VectorStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl AppContext {
    pub async fn connect(config: Config) -> Result<Self> {
        let vectors = create_vector_store(&config.vector_store)
            .await
            .with_context(|| format!("failed to connect to {} vector store", config.vector_store.driver))?;
        let metadata = create_metadata_store(&config.metadata)
            .await
            .context("failed to open metadata store")?;
        let objects = create_object_store(&config.storage)
            .with_context(|| format!("failed to set up {} object storage", config.storage.driver))?;

        Ok(Self {
            config,
            vectors,
            metadata,
            objects,
        })
    }

    /// Load configuration and connect in one step.
    pub async fn load() -> Result<Self> {
        let config = Config::load().context("failed to load configuration")?;
        Self::connect(config).await
    }

    /// Owner from the command line, falling back to the configured default.
    pub fn owner(&self, owner: Option<String>) -> String {
        owner.unwrap_or_else(|| self.config.watcher.owner.clone())
    }

    fn embedder(&self) -> Result<Arc<EmbeddingClient>> {
        Ok(Arc::new(
            EmbeddingClient::new(&self.config.embedding).context("failed to create embedding client")?,
        ))
    }

    pub fn ingest_service(&self) -> Result<IngestService> {
        let ingestion = self.config.ingestion.clone();
        let extractor = Arc::new(PlainTextExtractor::new(ingestion.allowed_extensions.clone()));

        IngestService::new(
            ingestion,
            self.embedder()?,
            Arc::clone(&self.vectors),
            Arc::clone(&self.metadata),
            Arc::clone(&self.objects),
            extractor,
        )
        .context("invalid ingestion settings")
    }

    pub fn query_service(&self, top_k: Option<u64>) -> Result<QueryService> {
        let completion = CompletionClient::new(&self.config.completion)
            .context("failed to create completion client")?;
        let config = QueryConfig {
            top_k: top_k.unwrap_or(self.config.query.top_k),
            ..self.config.query.clone()
        };

        Ok(QueryService::new(
            config,
            self.embedder()?,
            Arc::clone(&self.vectors),
            Arc::clone(&self.metadata),
            Arc::new(completion),
        ))
    }
}
