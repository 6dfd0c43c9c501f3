//! Embedding client for an OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EmbeddingError;
use crate::models::EmbeddingConfig;
use crate::utils::retry::{RetryConfig, RetryResult, with_retry};

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed texts, returning one vector per input in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> u64;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
    #[serde(default)]
    usage: Option<EmbedUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedUsage {
    #[serde(default)]
    total_tokens: u64,
}

/// Client for an OpenAI-compatible embedding service.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: u64,
    batch_size: usize,
    retry: RetryConfig,
}

impl EmbeddingClient {
    /// Create a new embedding client with the given configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let dimension = config
            .resolved_dimension()
            .map_err(|e| EmbeddingError::Configuration(e.to_string()))?;
        if config.batch_size == 0 {
            return Err(EmbeddingError::Configuration(
                "batch size must be greater than 0".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension,
            batch_size: config.batch_size,
            retry: RetryConfig::new(config.max_retries)
                .with_initial_delay(Duration::from_millis(config.retry_base_ms)),
        })
    }

    /// Get the base URL of the embedding service.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed one batch, retrying only on rate limiting.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match with_retry(&self.retry, || self.request_batch(texts)).await {
            RetryResult::Success(vectors) => Ok(vectors),
            RetryResult::Failed {
                last_error: EmbeddingError::RateLimited(_),
                attempts,
            } => Err(EmbeddingError::RetriesExhausted { attempts }),
            RetryResult::Failed { last_error, .. } => Err(last_error),
        }
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbedRequest {
            input: texts,
            model: &self.model,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::RequestError(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &embed_response.usage {
            tracing::trace!(tokens = usage.total_tokens, inputs = texts.len(), "embedding batch");
        }

        reassemble(embed_response.data, texts.len(), self.dimension)
    }
}

/// Order vectors by their response `index`, rejecting gaps, duplicates and wrong dimensions.
fn reassemble(
    data: Vec<EmbedData>,
    expected: usize,
    dimension: u64,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];

    for item in data {
        if item.embedding.len() as u64 != dimension {
            return Err(EmbeddingError::InvalidResponse(format!(
                "vector {} has dimension {}, expected {}",
                item.index,
                item.embedding.len(),
                dimension
            )));
        }
        let slot = slots.get_mut(item.index).ok_or_else(|| {
            EmbeddingError::InvalidResponse(format!(
                "index {} out of range for {} inputs",
                item.index, expected
            ))
        })?;
        if slot.is_some() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "duplicate index {}",
                item.index
            )));
        }
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| EmbeddingError::InvalidResponse(format!("missing index {}", i)))
        })
        .collect()
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.embed_batch(batch).await?;
            all_embeddings.extend(embeddings);
        }

        tracing::debug!(count = all_embeddings.len(), model = %self.model, "embedded texts");
        Ok(all_embeddings)
    }

    fn dimension(&self) -> u64 {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HttpReply, MockHttpServer};

    fn config(url: &str, dimension: u64, batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            url: url.to_string(),
            api_key: Some("sk-test".to_string()),
            dimension: Some(dimension),
            batch_size,
            retry_base_ms: 1,
            ..Default::default()
        }
    }

    /// Response body for `count` inputs, listed in reverse index order.
    fn embeddings_body(offset: usize, count: usize, dimension: usize) -> String {
        let data: Vec<_> = (0..count)
            .rev()
            .map(|i| {
                serde_json::json!({
                    "object": "embedding",
                    "index": i,
                    "embedding": vec![(offset + i) as f32; dimension],
                })
            })
            .collect();
        serde_json::json!({ "data": data, "usage": { "total_tokens": count } }).to_string()
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {}", i)).collect()
    }

    #[test]
    fn test_client_creation() {
        let config = EmbeddingConfig::default();
        let client = EmbeddingClient::new(&config).unwrap();
        assert_eq!(client.dimension(), 1536);
    }

    #[test]
    fn test_unknown_model_requires_dimension() {
        let config = EmbeddingConfig {
            model: "custom".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EmbeddingClient::new(&config),
            Err(EmbeddingError::Configuration(_))
        ));
    }

    #[test]
    fn test_base_url_trimming() {
        let config = EmbeddingConfig {
            url: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        };
        let client = EmbeddingClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let client = EmbeddingClient::new(&config("http://127.0.0.1:9", 3, 10)).unwrap();
        assert!(matches!(
            client.embed(vec![]).await,
            Err(EmbeddingError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn test_reassembles_by_index_below_batch_threshold() {
        let server = MockHttpServer::start(vec![HttpReply::json(200, embeddings_body(0, 3, 4))]).await;
        let client = EmbeddingClient::new(&config(&server.url(), 4, 100)).unwrap();

        let vectors = client.embed(texts(3)).await.unwrap();
        assert_eq!(vectors.len(), 3);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v, &vec![i as f32; 4]);
        }

        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/embeddings");
        assert_eq!(requests[0].header("authorization").as_deref(), Some("Bearer sk-test"));
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["input"].as_array().unwrap().len(), 3);
        assert_eq!(body["model"], "text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_batches_above_threshold_keep_input_order() {
        let server = MockHttpServer::start(vec![
            HttpReply::json(200, embeddings_body(0, 2, 2)),
            HttpReply::json(200, embeddings_body(2, 2, 2)),
            HttpReply::json(200, embeddings_body(4, 1, 2)),
        ])
        .await;
        let client = EmbeddingClient::new(&config(&server.url(), 2, 2)).unwrap();

        let vectors = client.embed(texts(5)).await.unwrap();
        assert_eq!(vectors.len(), 5);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], i as f32);
        }
        assert_eq!(server.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn test_retries_on_rate_limit() {
        let server = MockHttpServer::start(vec![
            HttpReply::json(429, r#"{"error":"slow down"}"#),
            HttpReply::json(429, r#"{"error":"slow down"}"#),
            HttpReply::json(200, embeddings_body(0, 1, 3)),
        ])
        .await;
        let client = EmbeddingClient::new(&config(&server.url(), 3, 10)).unwrap();

        let vector = client.embed_query("hello").await.unwrap();
        assert_eq!(vector, vec![0.0; 3]);
        assert_eq!(server.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_exhausted() {
        let replies = (0..4)
            .map(|_| HttpReply::json(429, r#"{"error":"slow down"}"#))
            .collect();
        let server = MockHttpServer::start(replies).await;
        let client = EmbeddingClient::new(&config(&server.url(), 3, 10)).unwrap();

        let err = client.embed(texts(1)).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::RetriesExhausted { attempts: 4 }));
        assert_eq!(server.requests().await.len(), 4);
    }

    #[tokio::test]
    async fn test_server_error_not_retried() {
        let server = MockHttpServer::start(vec![
            HttpReply::json(500, r#"{"error":"boom"}"#),
            HttpReply::json(200, embeddings_body(0, 1, 3)),
        ])
        .await;
        let client = EmbeddingClient::new(&config(&server.url(), 3, 10)).unwrap();

        let err = client.embed(texts(1)).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ServerError(_)));
        assert_eq!(server.requests().await.len(), 1);
    }

    #[test]
    fn test_reassemble_rejects_bad_indices() {
        let item = |index: usize| EmbedData {
            embedding: vec![0.0; 2],
            index,
        };

        let err = reassemble(vec![item(0), item(0)], 2, 2).unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let err = reassemble(vec![item(0), item(5)], 2, 2).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let err = reassemble(vec![item(1)], 2, 2).unwrap_err();
        assert!(err.to_string().contains("missing index 0"));
    }

    #[test]
    fn test_reassemble_rejects_wrong_dimension() {
        let data = vec![EmbedData {
            embedding: vec![0.0; 5],
            index: 0,
        }];
        assert!(matches!(
            reassemble(data, 1, 3),
            Err(EmbeddingError::InvalidResponse(_))
        ));
    }
}
