//! Chat completion client for an OpenAI-compatible `/chat/completions` endpoint.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::CompletionError;
use crate::models::CompletionConfig;

/// Incremental answer fragments; ends after the final fragment or the first error.
pub type CompletionStream = BoxStream<'static, Result<String, CompletionError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Generates text from a conversation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, CompletionError> {
        // Total timeout is set per blocking request so streams are not cut off
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CompletionError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if !stream {
            builder = builder.timeout(self.timeout);
        }
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(map_request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }

        Ok(response)
    }
}

fn map_request_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::RequestError(e)
    }
}

#[async_trait]
impl CompletionProvider for CompletionClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let response = self.send(messages, false).await?;
        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or(CompletionError::NoChoices)?;
        match choice.message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(CompletionError::InvalidResponse(
                "completion choice has no content".to_string(),
            )),
        }
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, CompletionError> {
        let response = self.send(messages, true).await?;
        Ok(sse_deltas(response.bytes_stream()))
    }
}

enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, CompletionError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| CompletionError::InvalidResponse(format!("bad stream chunk: {}", e)))?;
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
    {
        Some(content) if !content.is_empty() => Ok(SseLine::Delta(content)),
        _ => Ok(SseLine::Skip),
    }
}

struct SseState<B> {
    bytes: BoxStream<'static, Result<B, reqwest::Error>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, CompletionError>>,
    finished: bool,
}

impl<B> SseState<B> {
    /// Move every complete line out of the buffer into `pending`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            match parse_sse_line(line.trim()) {
                Ok(SseLine::Delta(content)) => self.pending.push_back(Ok(content)),
                Ok(SseLine::Skip) => {}
                Ok(SseLine::Done) => {
                    self.finished = true;
                    return;
                }
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Decode an SSE body into content deltas, buffering across chunk boundaries.
fn sse_deltas<S, B>(bytes: S) -> CompletionStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        bytes: bytes.boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(map_request_error(e)), state));
                }
                None => {
                    // Flush a trailing unterminated line; it may carry [DONE]
                    state.buffer.push(b'\n');
                    state.drain_lines();
                    if !state.finished {
                        state.pending.push_back(Err(CompletionError::InvalidResponse(
                            "stream ended before [DONE]".to_string(),
                        )));
                        state.finished = true;
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HttpReply, MockHttpServer};

    fn config(url: &str) -> CompletionConfig {
        CompletionConfig {
            url: url.to_string(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("be brief"), ChatMessage::user("hi")]
    }

    fn delta(content: &str) -> String {
        serde_json::json!({ "choices": [{ "delta": { "content": content } }] }).to_string()
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello there" } }]
        });
        let server = MockHttpServer::start(vec![HttpReply::json(200, body.to_string())]).await;
        let client = CompletionClient::new(&config(&server.url())).unwrap();

        let answer = client.complete(&messages()).await.unwrap();
        assert_eq!(answer, "Hello there");

        let requests = server.requests().await;
        assert_eq!(requests[0].path, "/chat/completions");
        let sent: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(sent["model"], "gpt-3.5-turbo");
        assert_eq!(sent["messages"][0]["role"], "system");
        assert!(sent.get("stream").is_none());
    }

    #[tokio::test]
    async fn test_complete_without_choices() {
        let server = MockHttpServer::start(vec![HttpReply::json(200, r#"{"choices":[]}"#)]).await;
        let client = CompletionClient::new(&config(&server.url())).unwrap();
        assert!(matches!(
            client.complete(&messages()).await,
            Err(CompletionError::NoChoices)
        ));
    }

    #[tokio::test]
    async fn test_complete_server_error() {
        let server = MockHttpServer::start(vec![HttpReply::json(500, r#"{"error":"x"}"#)]).await;
        let client = CompletionClient::new(&config(&server.url())).unwrap();
        assert!(matches!(
            client.complete(&messages()).await,
            Err(CompletionError::ServerError(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_until_done() {
        let events = vec![
            delta("Returns "),
            delta(""),
            delta("within 30 days"),
            "[DONE]".to_string(),
            delta("ignored"),
        ];
        let server = MockHttpServer::start(vec![HttpReply::sse(events)]).await;
        let client = CompletionClient::new(&config(&server.url())).unwrap();

        let stream = client.complete_stream(&messages()).await.unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["Returns ", "within 30 days"]);

        let sent: serde_json::Value =
            serde_json::from_str(&server.requests().await[0].body).unwrap();
        assert_eq!(sent["stream"], true);
    }

    #[tokio::test]
    async fn test_stream_handles_split_lines() {
        let raw = format!("data: {}\n\ndata: {}\n\ndata: [DONE]\n\n", delta("ab"), delta("cd"));
        let (left, right) = raw.split_at(raw.len() / 2);
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> =
            vec![Ok(left.as_bytes().to_vec()), Ok(right.as_bytes().to_vec())];

        let parts: Vec<String> = sse_deltas(futures_util::stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(parts, vec!["ab", "cd"]);
    }

    #[tokio::test]
    async fn test_stream_invalid_chunk_is_error() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> =
            vec![Ok(b"data: not-json\n\n".to_vec())];
        let items: Vec<_> = sse_deltas(futures_util::stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(CompletionError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_complete_without_content_is_error() {
        for message in [
            serde_json::json!({ "role": "assistant", "content": null }),
            serde_json::json!({ "role": "assistant" }),
            serde_json::json!({ "role": "assistant", "content": "  " }),
        ] {
            let body = serde_json::json!({ "choices": [{ "message": message }] });
            let server = MockHttpServer::start(vec![HttpReply::json(200, body.to_string())]).await;
            let client = CompletionClient::new(&config(&server.url())).unwrap();
            assert!(matches!(
                client.complete(&messages()).await,
                Err(CompletionError::InvalidResponse(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_stream_closed_before_done_is_error() {
        let server = MockHttpServer::start(vec![HttpReply::sse([delta("Returns are accepted within")])]).await;
        let client = CompletionClient::new(&config(&server.url())).unwrap();

        let items: Vec<_> = client.complete_stream(&messages()).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Returns are accepted within");
        assert!(matches!(items[1], Err(CompletionError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_stream_done_without_trailing_newline() {
        let raw = format!("data: {}\n\ndata: [DONE]", delta("ok"));
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![Ok(raw.into_bytes())];
        let parts: Vec<String> = sse_deltas(futures_util::stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(parts, vec!["ok"]);
    }
}
