use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat, VectorDriver};
use crate::services::{collection_name, create_metadata_store, create_vector_store};

pub async fn handle_status(format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);
    let owner = config.watcher.owner.clone();

    let vector_store_connected = match create_vector_store(&config.vector_store).await {
        Ok(store) => store.health_check().await.unwrap_or(false),
        Err(e) => {
            if verbose {
                eprintln!("Vector store: {e}");
            }
            false
        }
    };

    let (metadata_connected, documents) = match create_metadata_store(&config.metadata).await {
        Ok(store) => match store.list_documents(&owner).await {
            Ok(docs) => (true, Some(docs.len())),
            Err(_) => (false, None),
        },
        Err(e) => {
            if verbose {
                eprintln!("Metadata store: {e}");
            }
            (false, None)
        }
    };

    let vector_store_url = match config.vector_store.driver {
        VectorDriver::Qdrant => config.vector_store.url.clone(),
        VectorDriver::PostgreSQL => "(database_url)".to_string(),
    };

    let status = StatusInfo {
        collection: collection_name(config.vector_store.collection_prefix.as_deref(), &owner),
        owner,
        embedding_model: config.embedding.model.clone(),
        completion_model: config.completion.model.clone(),
        vector_store_driver: config.vector_store.driver.to_string(),
        vector_store_url,
        vector_store_connected,
        metadata_driver: config.metadata.driver.to_string(),
        metadata_connected,
        documents,
        storage_path: config.storage.location(),
    };

    print!("{}", formatter.format_status(&status));

    if !vector_store_connected {
        eprintln!();
        match config.vector_store.driver {
            VectorDriver::Qdrant => {
                eprintln!("Warning: Qdrant not running. Start with: docker-compose up -d qdrant");
            }
            VectorDriver::PostgreSQL => {
                eprintln!("Warning: PostgreSQL not accessible. Check connection settings.");
            }
        }
    }
    if config.embedding.api_key.is_none() {
        eprintln!("Hint: no embedding API key configured. Set OPENAI_API_KEY.");
    }

    Ok(())
}
