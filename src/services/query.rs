//! Retrieval-augmented question answering over an owner's documents.

use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::completion::{ChatMessage, CompletionProvider};
use super::embedding::Embedder;
use super::metadata::MetadataStore;
use super::vector_store::VectorStore;
use crate::error::{QueryError, ValidationError};
use crate::models::{
    Answer, AnswerEvent, NO_CONTEXT_ANSWER, QueryConfig, QueryRecord, ScoredRecord, SourceRef,
};

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to the user's uploaded documents.

Your role is to:
1. Answer questions accurately using information from the provided context
2. Cite specific sources when providing information
3. Be concise and actionable in your responses
4. If the information isn't in the context, clearly state that

CRITICAL: Base your answer ONLY on the provided context. Do not use external knowledge.";

const EVENT_BUFFER: usize = 32;

/// Answers questions from the chunks most similar to them.
#[derive(Clone)]
pub struct QueryService {
    config: QueryConfig,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    metadata: Arc<dyn MetadataStore>,
    completion: Arc<dyn CompletionProvider>,
}

/// Retrieved context ready for generation.
struct Retrieval {
    question: String,
    sources: Vec<SourceRef>,
    messages: Vec<ChatMessage>,
}

impl QueryService {
    pub fn new(
        config: QueryConfig,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        metadata: Arc<dyn MetadataStore>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            config,
            embedder,
            vectors,
            metadata,
            completion,
        }
    }

    /// Embed the question and fetch the owner's nearest chunks.
    /// `None` when the owner has nothing relevant.
    async fn retrieve(&self, owner: &str, question: &str) -> Result<Option<Retrieval>, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ValidationError::EmptyQuestion.into());
        }
        if owner.trim().is_empty() {
            return Err(ValidationError::EmptyOwner.into());
        }

        let vector = self.embedder.embed_query(question).await?;
        let hits: Vec<ScoredRecord> = self
            .vectors
            .search(owner, vector, self.config.top_k)
            .await?
            .into_iter()
            .filter(|hit| !hit.payload.content.trim().is_empty())
            .collect();
        tracing::debug!(owner, hits = hits.len(), "retrieved context");

        if hits.is_empty() {
            return Ok(None);
        }

        Ok(Some(Retrieval {
            question: question.to_string(),
            sources: hits.iter().map(SourceRef::from).collect(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(user_prompt(question, &hits)),
            ],
        }))
    }

    pub async fn ask(&self, owner: &str, question: &str) -> Result<Answer, QueryError> {
        let Some(retrieval) = self.retrieve(owner, question).await? else {
            tracing::info!(owner, "no matching context, skipping completion");
            return Ok(Answer::no_context(question.trim()));
        };

        let text = self.completion.complete(&retrieval.messages).await?;
        let answer = Answer {
            question: retrieval.question,
            answer: text,
            sources: retrieval.sources,
        };

        record_history(self.metadata.as_ref(), &self.config, owner, &answer).await;
        tracing::info!(owner, sources = answer.sources.len(), "question answered");
        Ok(answer)
    }

    /// Stream the answer as it is generated.
    ///
    /// Retrieval failures are returned directly. Once streaming starts, the
    /// channel yields deltas followed by exactly one `Done` or `Failed`.
    /// Dropping the receiver aborts generation.
    pub async fn ask_stream(
        &self,
        owner: &str,
        question: &str,
    ) -> Result<mpsc::Receiver<AnswerEvent>, QueryError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let Some(retrieval) = self.retrieve(owner, question).await? else {
            // Capacity covers both events, so these sends cannot block
            let _ = tx
                .send(AnswerEvent::Delta {
                    content: NO_CONTEXT_ANSWER.to_string(),
                })
                .await;
            let _ = tx.send(AnswerEvent::Done { sources: Vec::new() }).await;
            return Ok(rx);
        };

        let mut stream = self.completion.complete_stream(&retrieval.messages).await?;
        let metadata = Arc::clone(&self.metadata);
        let config = self.config.clone();
        let owner = owner.to_string();

        tokio::spawn(async move {
            let mut text = String::new();
            loop {
                tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        tracing::debug!(owner = %owner, "answer receiver dropped, cancelling generation");
                        return;
                    }
                    item = stream.next() => match item {
                        Some(Ok(delta)) => {
                            text.push_str(&delta);
                            if tx.send(AnswerEvent::Delta { content: delta }).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(owner = %owner, error = %e, "answer generation failed");
                            let _ = tx.send(AnswerEvent::Failed { message: e.to_string() }).await;
                            return;
                        }
                        None => break,
                    }
                }
            }
            drop(stream);

            let answer = Answer {
                question: retrieval.question,
                answer: text,
                sources: retrieval.sources,
            };
            let _ = tx
                .send(AnswerEvent::Done {
                    sources: answer.sources.clone(),
                })
                .await;
            record_history(metadata.as_ref(), &config, &owner, &answer).await;
        });

        Ok(rx)
    }

    pub async fn history(&self, owner: &str, limit: u32) -> Result<Vec<QueryRecord>, QueryError> {
        if owner.trim().is_empty() {
            return Err(ValidationError::EmptyOwner.into());
        }
        Ok(self.metadata.recent_queries(owner, limit).await?)
    }
}

fn user_prompt(question: &str, hits: &[ScoredRecord]) -> String {
    // Numbering follows the order of the returned sources
    let context: String = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("\n[Document {}]: {}\n", i + 1, hit.payload.content))
        .collect();

    format!(
        "Context from user's documents:\n{}\n\nQuestion: {}\n\nAnswer based on the above context:",
        context, question
    )
}

/// Best effort: a failed audit write never fails the answer.
async fn record_history(metadata: &dyn MetadataStore, config: &QueryConfig, owner: &str, answer: &Answer) {
    if !config.record_history {
        return;
    }
    let record = QueryRecord::from_answer(owner, answer);
    if let Err(e) = metadata.insert_query(&record).await {
        tracing::warn!(owner, error = %e, "failed to save query history");
    }
}
