use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::format::OutputFormat;
use crate::error::ConfigError;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_OWNER: &str = "local-user";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Vector dimensions of the embedding models we know about.
pub fn known_model_dimension(model: &str) -> Option<u64> {
    match model {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ragdesk").join("config.toml"))
    }

    /// Load the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Apply environment variable overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("OPENAI_API_KEY") {
            self.embedding.api_key = Some(key.clone());
            self.completion.api_key = Some(key);
        }
        if let Some(url) = var("EMBEDDING_URL") {
            self.embedding.url = url;
        }
        if let Some(url) = var("COMPLETION_URL") {
            self.completion.url = url;
        }
        if let Some(url) = var("QDRANT_URL") {
            self.vector_store.url = url;
        }
        if let Some(key) = var("QDRANT_API_KEY") {
            self.vector_store.api_key = Some(key);
        }
        if let Some(url) = var("DATABASE_URL") {
            self.vector_store.postgres.database_url = Some(url.clone());
            self.metadata.database_url = Some(url);
        }
        if let Some(path) = var("LOCAL_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(driver) = var("FILESYSTEM_DRIVER") {
            match driver.parse() {
                Ok(driver) => self.storage.driver = driver,
                Err(e) => tracing::warn!(error = %e, "ignoring FILESYSTEM_DRIVER"),
            }
        }
        if let Some(bucket) = var("S3_BUCKET") {
            self.storage.s3.bucket = bucket;
        }
        if let Some(region) = var("AWS_REGION") {
            self.storage.s3.region = region;
        }
        if let Some(endpoint) = var("AWS_ENDPOINT") {
            self.storage.s3.endpoint = Some(endpoint);
        }
        if let Some(id) = var("AWS_ACCESS_KEY_ID") {
            self.storage.s3.access_key_id = Some(id);
        }
        if let Some(secret) = var("AWS_SECRET_ACCESS_KEY") {
            self.storage.s3.secret_access_key = Some(secret);
        }
        if let Some(path) = var("KNOWLEDGE_BASE_PATH") {
            self.watcher.path = PathBuf::from(path);
        }
        if let Some(owner) = var("DEFAULT_USER_ID") {
            self.watcher.owner = owner;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingestion = &self.ingestion;
        if ingestion.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "ingestion.chunk_size must be greater than 0".to_string(),
            ));
        }
        if ingestion.chunk_overlap >= ingestion.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "ingestion.chunk_overlap ({}) must be smaller than chunk_size ({})",
                ingestion.chunk_overlap, ingestion.chunk_size
            )));
        }
        if ingestion.allowed_extensions.is_empty() {
            return Err(ConfigError::ValidationError(
                "ingestion.allowed_extensions cannot be empty".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.query.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "query.top_k must be greater than 0".to_string(),
            ));
        }
        if self.watcher.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "watcher.max_concurrent must be greater than 0".to_string(),
            ));
        }
        self.validate_storage()?;
        self.embedding.resolved_dimension()?;
        Ok(())
    }

    fn validate_storage(&self) -> Result<(), ConfigError> {
        let s3 = &self.storage.s3;
        match self.storage.driver {
            StorageDriver::Local => return Ok(()),
            StorageDriver::LocalStack if s3.endpoint.is_none() => {
                return Err(ConfigError::ValidationError(
                    "storage.s3.endpoint (AWS_ENDPOINT) is required for the localstack driver"
                        .to_string(),
                ));
            }
            StorageDriver::LocalStack | StorageDriver::S3 => {}
        }
        if s3.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.s3.bucket cannot be empty".to_string(),
            ));
        }
        if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
            return Err(ConfigError::ValidationError(
                "storage.s3 access_key_id and secret_access_key must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Overrides the known dimension of `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<u64>,

    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn resolved_dimension(&self) -> Result<u64, ConfigError> {
        match self.dimension {
            Some(0) => Err(ConfigError::ValidationError(
                "embedding.dimension must be greater than 0".to_string(),
            )),
            Some(dim) => Ok(dim),
            None => known_model_dimension(&self.model).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "unknown embedding model '{}': set embedding.dimension explicitly",
                    self.model
                ))
            }),
        }
    }
}

fn default_openai_url() -> String {
    DEFAULT_OPENAI_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_embedding_timeout() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_openai_url(),
            api_key: None,
            model: default_embedding_model(),
            dimension: None,
            batch_size: default_embedding_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_openai_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_completion_model")]
    pub model: String,

    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_completion_model() -> String {
    DEFAULT_COMPLETION_MODEL.to_string()
}

fn default_completion_timeout() -> u64 {
    60
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            url: default_openai_url(),
            api_key: None,
            model: default_completion_model(),
            timeout_secs: default_completion_timeout(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Vector store backend driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Qdrant,
    #[serde(alias = "postgres")]
    PostgreSQL,
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Qdrant => write!(f, "qdrant"),
            VectorDriver::PostgreSQL => write!(f, "postgresql"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Prepended to every per-owner collection name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_prefix: Option<String>,

    #[serde(default)]
    pub postgres: PostgresVectorConfig,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: default_qdrant_url(),
            api_key: None,
            collection_prefix: None,
            postgres: PostgresVectorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresVectorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for PostgresVectorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            schema: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Metadata store backend driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataDriver {
    #[default]
    Sqlite,
    #[serde(alias = "postgres")]
    PostgreSQL,
}

impl std::fmt::Display for MetadataDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataDriver::Sqlite => write!(f, "sqlite"),
            MetadataDriver::PostgreSQL => write!(f, "postgresql"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub driver: MetadataDriver,

    /// SQLite database file; defaults to `{data_dir}/ragdesk/metadata.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl MetadataConfig {
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        self.sqlite_path
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join("ragdesk").join("metadata.db")))
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            driver: MetadataDriver::default(),
            sqlite_path: None,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Object storage backend driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    #[default]
    Local,
    /// S3 API behind a custom endpoint, addressed path-style
    LocalStack,
    S3,
}

impl std::fmt::Display for StorageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageDriver::Local => write!(f, "local"),
            StorageDriver::LocalStack => write!(f, "localstack"),
            StorageDriver::S3 => write!(f, "s3"),
        }
    }
}

impl std::str::FromStr for StorageDriver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageDriver::Local),
            "localstack" => Ok(StorageDriver::LocalStack),
            "s3" => Ok(StorageDriver::S3),
            other => Err(ConfigError::ValidationError(format!(
                "unknown storage driver '{other}': expected local, localstack or s3"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub driver: StorageDriver,

    /// Root directory of the local driver.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub s3: S3Config,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./uploads")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::default(),
            path: default_storage_path(),
            s3: S3Config::default(),
        }
    }
}

impl StorageConfig {
    /// Where objects end up, for status output.
    pub fn location(&self) -> String {
        match self.driver {
            StorageDriver::Local => self.path.display().to_string(),
            StorageDriver::LocalStack | StorageDriver::S3 => format!("s3://{}", self.s3.bucket),
        }
    }
}

/// Settings shared by the `s3` and `localstack` drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_s3_bucket")]
    pub bucket: String,

    #[serde(default = "default_s3_region")]
    pub region: String,

    /// Required by `localstack`, ignored by `s3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Without a key pair the ambient AWS credential chain is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

fn default_s3_bucket() -> String {
    "rag-assistant-uploads".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_s3_bucket(),
            region: default_s3_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Unit the chunker counts in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    #[default]
    Characters,
    Tokens,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default)]
    pub chunk_strategy: ChunkStrategy,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_allowed_extensions() -> Vec<String> {
    [".pdf", ".txt", ".md", ".json", ".csv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    150
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            max_file_size: default_max_file_size(),
            chunk_strategy: ChunkStrategy::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: u64,

    #[serde(default = "default_record_history")]
    pub record_history: bool,

    #[serde(default)]
    pub default_format: OutputFormat,
}

fn default_top_k() -> u64 {
    5
}

fn default_record_history() -> bool {
    true
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            record_history: default_record_history(),
            default_format: OutputFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_watch_path")]
    pub path: PathBuf,

    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_watch_path() -> PathBuf {
    PathBuf::from("./knowledgebase")
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_max_concurrent() -> usize {
    4
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.*".to_string(),
        "**/.*/**".to_string(),
        "**/*~".to_string(),
        "**/*.swp".to_string(),
    ]
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            path: default_watch_path(),
            owner: default_owner(),
            debounce_ms: default_debounce_ms(),
            max_concurrent: default_max_concurrent(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
