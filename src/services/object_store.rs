//! Raw upload storage keyed by `{owner}/{hash}/{filename}`.

use ::object_store::ObjectStore as _;
use ::object_store::PutPayload;
use ::object_store::aws::{AmazonS3, AmazonS3Builder};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::StorageError;
use crate::models::{S3Config, StorageConfig, StorageDriver};

/// Blob storage capability.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Keys are relative `/`-separated paths with no empty, `.` or `..` segments.
fn check_key(key: &str) -> Result<(), StorageError> {
    let bad_segment = key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if key.is_empty() || key.contains('\\') || bad_segment {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Stores objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path, rejecting anything that could escape the root.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        check_key(key)?;
        let relative = Path::new(key);
        let all_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !all_normal {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Remove now-empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // Fails when the directory still has entries
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(key, bytes = bytes.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_parents(&path).await;
        tracing::debug!(key, "deleted object");
        Ok(())
    }
}

/// Stores objects in an S3 bucket, or any service speaking the S3 API.
#[derive(Debug)]
pub struct S3ObjectStore {
    client: AmazonS3,
    bucket: String,
    endpoint: Option<String>,
}

impl S3ObjectStore {
    /// With an `endpoint`, requests go there path-style instead of to AWS.
    pub fn new(config: &S3Config, endpoint: Option<&str>) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(id)
                .with_secret_access_key(secret);
        }
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }

        let client = builder
            .build()
            .map_err(|e| StorageError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            endpoint: endpoint.map(str::to_string),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn location(key: &str) -> Result<::object_store::path::Path, StorageError> {
        check_key(key)?;
        ::object_store::path::Path::parse(key).map_err(|_| StorageError::InvalidKey(key.to_string()))
    }
}

fn s3_error(key: &str, error: ::object_store::Error) -> StorageError {
    match error {
        ::object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        other => StorageError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let location = Self::location(key)?;
        self.client
            .put(&location, PutPayload::from(bytes.to_vec()))
            .await
            .map_err(|e| s3_error(key, e))?;
        tracing::debug!(key, bucket = %self.bucket, bytes = bytes.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let location = Self::location(key)?;
        let result = self
            .client
            .get(&location)
            .await
            .map_err(|e| s3_error(key, e))?;
        let bytes = result.bytes().await.map_err(|e| s3_error(key, e))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let location = Self::location(key)?;
        match self.client.delete(&location).await {
            Ok(()) | Err(::object_store::Error::NotFound { .. }) => {
                tracing::debug!(key, bucket = %self.bucket, "deleted object");
                Ok(())
            }
            Err(e) => Err(s3_error(key, e)),
        }
    }
}

/// Create an object store based on configuration.
pub fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config.driver {
        StorageDriver::Local => Ok(Arc::new(LocalObjectStore::new(config.path.clone()))),
        StorageDriver::LocalStack => {
            let endpoint = config.s3.endpoint.as_deref().ok_or_else(|| {
                StorageError::Configuration(
                    "the localstack driver needs storage.s3.endpoint".to_string(),
                )
            })?;
            Ok(Arc::new(S3ObjectStore::new(&config.s3, Some(endpoint))?))
        }
        // Real S3 always goes to AWS, whatever endpoint is configured
        StorageDriver::S3 => Ok(Arc::new(S3ObjectStore::new(&config.s3, None)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path());

        store.put("alice/abc/notes.md", b"# Notes").await.unwrap();
        assert_eq!(store.get("alice/abc/notes.md").await.unwrap(), b"# Notes");

        store.delete("alice/abc/notes.md").await.unwrap();
        assert!(matches!(
            store.get("alice/abc/notes.md").await,
            Err(StorageError::NotFound(_))
        ));
        // empty parents are cleaned up, the root stays
        assert!(!temp.path().join("alice").exists());
        assert!(temp.path().exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path());
        store.delete("alice/none/file.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_keeps_sibling_objects() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path());
        store.put("alice/h1/a.txt", b"a").await.unwrap();
        store.put("alice/h2/b.txt", b"b").await.unwrap();

        store.delete("alice/h1/a.txt").await.unwrap();
        assert!(!temp.path().join("alice/h1").exists());
        assert_eq!(store.get("alice/h2/b.txt").await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path());
        for key in ["", "../etc/passwd", "/abs/path", "a//b", "a/./b", "a\\b"] {
            assert!(
                matches!(store.put(key, b"x").await, Err(StorageError::InvalidKey(_))),
                "key {:?} accepted",
                key
            );
        }
    }

    fn localstack() -> S3Config {
        S3Config {
            bucket: "uploads-test".to_string(),
            access_key_id: Some("test".to_string()),
            secret_access_key: Some("test".to_string()),
            endpoint: Some("http://localhost:4566".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_s3_rejects_escaping_keys_before_any_request() {
        // nothing listens on this port
        let store = S3ObjectStore::new(&localstack(), Some("http://127.0.0.1:9")).unwrap();
        for key in ["", "../etc/passwd", "/abs/path", "a//b", "a/./b", "a\\b"] {
            assert!(
                matches!(store.put(key, b"x").await, Err(StorageError::InvalidKey(_))),
                "key {:?} accepted",
                key
            );
        }
        assert!(matches!(
            store.delete("alice/../../b").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_s3_object_path_matches_key() {
        let location = S3ObjectStore::location("alice/abc123/notes.md").unwrap();
        assert_eq!(location.as_ref(), "alice/abc123/notes.md");
    }

    #[test]
    fn test_create_object_store_per_driver() {
        let temp = TempDir::new().unwrap();
        let mut config = StorageConfig {
            path: temp.path().to_path_buf(),
            ..Default::default()
        };
        assert!(create_object_store(&config).is_ok());

        config.driver = StorageDriver::LocalStack;
        config.s3 = S3Config {
            endpoint: None,
            ..localstack()
        };
        assert!(matches!(
            create_object_store(&config),
            Err(StorageError::Configuration(_))
        ));

        config.s3 = localstack();
        assert!(create_object_store(&config).is_ok());

        config.driver = StorageDriver::S3;
        assert!(create_object_store(&config).is_ok());
    }

    #[test]
    fn test_s3_driver_ignores_endpoint() {
        let config = localstack();
        let aws = S3ObjectStore::new(&config, None).unwrap();
        assert_eq!(aws.bucket(), "uploads-test");
        assert_eq!(aws.endpoint(), None);

        let local = S3ObjectStore::new(&config, config.endpoint.as_deref()).unwrap();
        assert_eq!(local.endpoint(), Some("http://localhost:4566"));
    }
}
