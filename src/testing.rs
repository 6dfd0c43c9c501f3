//! Test doubles shared across module tests.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::error::{CompletionError, EmbeddingError, StorageError, VectorStoreError};
use crate::models::{IngestionConfig, QueryConfig, ScoredRecord, VectorDriver, VectorRecord};
use crate::services::completion::{ChatMessage, CompletionProvider, CompletionStream};
use crate::services::embedding::Embedder;
use crate::services::extract::PlainTextExtractor;
use crate::services::ingest::IngestService;
use crate::services::metadata::SqliteMetadataStore;
use crate::services::object_store::ObjectStore;
use crate::services::query::QueryService;
use crate::services::vector_store::{VectorStore, collection_name};

/// A canned HTTP/1.1 response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    /// Advertise more bytes than sent and keep the connection open until the client hangs up.
    pub hold_open: bool,
}

impl HttpReply {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.into(),
            hold_open: false,
        }
    }

    /// Server-sent events, one `data:` line per item.
    pub fn sse<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let body = events
            .into_iter()
            .map(|e| format!("data: {}\n\n", e.as_ref()))
            .collect::<String>();
        Self {
            status: 200,
            content_type: "text/event-stream",
            body,
            hold_open: false,
        }
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// A request captured by [`MockHttpServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

/// Serves the given replies in order, one connection each.
pub struct MockHttpServer {
    addr: std::net::SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    client_hung_up: Arc<AtomicBool>,
}

impl MockHttpServer {
    pub async fn start(replies: Vec<HttpReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client_hung_up = Arc::new(AtomicBool::new(false));

        let recorded = Arc::clone(&requests);
        let hung_up = Arc::clone(&client_hung_up);
        tokio::spawn(async move {
            for reply in replies {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                if let Some(request) = read_request(&mut stream).await {
                    recorded.lock().await.push(request);
                }
                write_reply(&mut stream, &reply).await;
                if reply.hold_open {
                    let mut buf = [0u8; 256];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                    hung_up.store(true, Ordering::SeqCst);
                } else {
                    let _ = stream.shutdown().await;
                }
            }
        });

        Self {
            addr,
            requests,
            client_hung_up,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    pub fn client_hung_up(&self) -> bool {
        self.client_hung_up.load(Ordering::SeqCst)
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&buf[head_end..]).to_string(),
    })
}

async fn write_reply(stream: &mut TcpStream, reply: &HttpReply) {
    let reason = match reply.status {
        200 => "OK",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let advertised = if reply.hold_open {
        reply.body.len() + 1024
    } else {
        reply.body.len()
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status, reason, reply.content_type, advertised
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(reply.body.as_bytes()).await;
    let _ = stream.flush().await;
}

/// Dimension of [`FakeEmbedder`] vectors.
pub const FAKE_DIMENSION: u64 = 64;

/// Deterministic bag-of-words embedder: texts sharing words get similar vectors.
#[derive(Default)]
pub struct FakeEmbedder {
    calls: AtomicUsize,
    failure: std::sync::Mutex<Option<EmbeddingError>>,
}

impl FakeEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, error: EmbeddingError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; FAKE_DIMENSION as usize];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a
            let hash = word.to_lowercase().bytes().fold(0xcbf29ce484222325u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x100000001b3)
            });
            vector[(hash % FAKE_DIMENSION) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().take() {
            return Err(error);
        }
        if texts.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn dimension(&self) -> u64 {
        FAKE_DIMENSION
    }
}

struct FakeCollection {
    dimension: u64,
    records: HashMap<String, VectorRecord>,
}

/// Vector store keeping one map per owner collection, with failure injection.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: std::sync::Mutex<HashMap<String, FakeCollection>>,
    calls: AtomicUsize,
    upsert_failures: AtomicU32,
    drop_alternate: AtomicBool,
    fail_search: AtomicBool,
    hang_upsert: AtomicBool,
}

impl InMemoryVectorStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` upserts.
    pub fn fail_upserts(&self, n: u32) {
        self.upsert_failures.store(n, Ordering::SeqCst);
    }

    /// Silently keep only every other record of an upsert.
    pub fn drop_every_other_record(&self, enabled: bool) {
        self.drop_alternate.store(enabled, Ordering::SeqCst);
    }

    /// Make upserts wait forever, as if the index stopped responding mid-write.
    pub fn hang_upserts(&self, enabled: bool) {
        self.hang_upsert.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_searches(&self, enabled: bool) {
        self.fail_search.store(enabled, Ordering::SeqCst);
    }

    pub fn count(&self, owner: &str, document_id: &str) -> u64 {
        let collections = self.collections.lock().unwrap();
        collections
            .get(&collection_name(None, owner))
            .map(|c| {
                c.records
                    .values()
                    .filter(|r| r.payload.document_id == document_id)
                    .count() as u64
            })
            .unwrap_or(0)
    }

    pub fn total(&self, owner: &str) -> usize {
        let collections = self.collections.lock().unwrap();
        collections
            .get(&collection_name(None, owner))
            .map(|c| c.records.len())
            .unwrap_or(0)
    }

    /// Drop a document's vectors behind the orchestrator's back.
    pub fn remove_document(&self, owner: &str, document_id: &str) {
        let mut collections = self.collections.lock().unwrap();
        if let Some(c) = collections.get_mut(&collection_name(None, owner)) {
            c.records.retain(|_, r| r.payload.document_id != document_id);
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn ensure_collection(&self, owner: &str, dimension: u64) -> Result<(), VectorStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.collections
            .lock()
            .unwrap()
            .entry(collection_name(None, owner))
            .or_insert_with(|| FakeCollection {
                dimension,
                records: HashMap::new(),
            });
        Ok(())
    }

    async fn upsert(&self, owner: &str, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_upsert.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failures = self.upsert_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.upsert_failures.store(failures - 1, Ordering::SeqCst);
            return Err(VectorStoreError::UpsertError("injected failure".to_string()));
        }

        let drop_alternate = self.drop_alternate.load(Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        let name = collection_name(None, owner);
        let collection = collections
            .get_mut(&name)
            .ok_or_else(|| VectorStoreError::CollectionError(format!("{} does not exist", name)))?;

        for (i, record) in records.into_iter().enumerate() {
            if record.vector.len() as u64 != collection.dimension {
                return Err(VectorStoreError::UpsertError("dimension mismatch".to_string()));
            }
            if drop_alternate && i % 2 == 1 {
                continue;
            }
            collection.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn search(
        &self,
        owner: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(VectorStoreError::Unavailable("injected failure".to_string()));
        }

        let collections = self.collections.lock().unwrap();
        let Some(collection) = collections.get(&collection_name(None, owner)) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<ScoredRecord> = collection
            .records
            .values()
            .map(|r| ScoredRecord {
                id: r.id.clone(),
                score: cosine(&vector, &r.vector),
                payload: r.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn delete_by_document(&self, owner: &str, document_id: &str) -> Result<(), VectorStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.remove_document(owner, document_id);
        Ok(())
    }

    async fn count_by_document(&self, owner: &str, document_id: &str) -> Result<u64, VectorStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.count(owner, document_id))
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::Qdrant
    }
}

/// Object store backed by a map.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: std::sync::Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum StreamTail {
    End,
    Fail(String),
    Hang,
}

#[derive(Debug, Clone)]
enum Script {
    Reply(String),
    Fail,
    Fragments(Vec<String>, StreamTail),
}

/// Sets a flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Scripted completion provider that records the conversations it receives.
pub struct FakeCompletion {
    script: std::sync::Mutex<Script>,
    calls: AtomicUsize,
    last_messages: std::sync::Mutex<Option<Vec<ChatMessage>>>,
    stream_dropped: Arc<AtomicBool>,
}

impl Default for FakeCompletion {
    fn default() -> Self {
        Self {
            script: std::sync::Mutex::new(Script::Reply("ok".to_string())),
            calls: AtomicUsize::new(0),
            last_messages: std::sync::Mutex::new(None),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl FakeCompletion {
    fn set(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn reply(&self, text: &str) {
        self.set(Script::Reply(text.to_string()));
    }

    pub fn fail(&self) {
        self.set(Script::Fail);
    }

    pub fn stream_fragments(&self, parts: &[&str]) {
        self.set(Script::Fragments(owned(parts), StreamTail::End));
    }

    pub fn stream_then_fail(&self, parts: &[&str], message: &str) {
        self.set(Script::Fragments(owned(parts), StreamTail::Fail(message.to_string())));
    }

    /// Emit the fragments, then never finish.
    pub fn stream_forever(&self, parts: &[&str]) {
        self.set(Script::Fragments(owned(parts), StreamTail::Hang));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.last_messages.lock().unwrap().clone()
    }

    pub fn stream_dropped(&self) -> bool {
        self.stream_dropped.load(Ordering::SeqCst)
    }

    fn record(&self, messages: &[ChatMessage]) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = Some(messages.to_vec());
        self.script.lock().unwrap().clone()
    }
}

fn owned(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

#[async_trait]
impl CompletionProvider for FakeCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        match self.record(messages) {
            Script::Reply(text) => Ok(text),
            Script::Fail => Err(CompletionError::ServerError("status 500".to_string())),
            Script::Fragments(parts, _) => Ok(parts.concat()),
        }
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, CompletionError> {
        let (parts, tail) = match self.record(messages) {
            Script::Reply(text) => (vec![text], StreamTail::End),
            Script::Fail => return Err(CompletionError::ServerError("status 500".to_string())),
            Script::Fragments(parts, tail) => (parts, tail),
        };

        let tail: BoxStream<'static, Result<String, CompletionError>> = match tail {
            StreamTail::End => stream::empty().boxed(),
            StreamTail::Fail(message) => {
                stream::once(async move { Err(CompletionError::ServerError(message)) }).boxed()
            }
            StreamTail::Hang => stream::pending().boxed(),
        };

        let guard = DropFlag(Arc::clone(&self.stream_dropped));
        Ok(stream::iter(parts.into_iter().map(Ok))
            .chain(tail)
            .map(move |item| {
                let _keep = &guard;
                item
            })
            .boxed())
    }
}

/// Services wired to fakes, with metadata in a temporary SQLite database.
pub struct Harness {
    pub ingest: IngestService,
    pub query: QueryService,
    pub embedder: Arc<FakeEmbedder>,
    pub vectors: Arc<InMemoryVectorStore>,
    pub metadata: Arc<SqliteMetadataStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub completion: Arc<FakeCompletion>,
    _temp: TempDir,
}

/// Uploads are capped at 4 KiB; everything else uses defaults.
pub fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let metadata = Arc::new(SqliteMetadataStore::open(&temp.path().join("metadata.db")).unwrap());
    let embedder = Arc::new(FakeEmbedder::default());
    let vectors = Arc::new(InMemoryVectorStore::default());
    let objects = Arc::new(MemoryObjectStore::default());
    let completion = Arc::new(FakeCompletion::default());

    let config = IngestionConfig {
        max_file_size: 4096,
        ..Default::default()
    };
    let extractor = Arc::new(PlainTextExtractor::new(config.allowed_extensions.clone()));
    let ingest = IngestService::new(
        config,
        embedder.clone(),
        vectors.clone(),
        metadata.clone(),
        objects.clone(),
        extractor,
    )
    .unwrap();
    let query = QueryService::new(
        QueryConfig::default(),
        embedder.clone(),
        vectors.clone(),
        metadata.clone(),
        completion.clone(),
    );

    Harness {
        ingest,
        query,
        embedder,
        vectors,
        metadata,
        objects,
        completion,
        _temp: temp,
    }
}
