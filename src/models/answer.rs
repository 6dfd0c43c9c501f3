//! Question answering models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::vector::ScoredRecord;

/// Answer returned when retrieval finds nothing for the owner.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find any relevant information in your documents to answer this question.";

/// A citation derived from a retrieved chunk's stored payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub chunk_index: u32,
    pub score: f32,
}

impl From<&ScoredRecord> for SourceRef {
    fn from(record: &ScoredRecord) -> Self {
        Self {
            document_id: record.payload.document_id.clone(),
            filename: record.payload.filename.clone(),
            page: record.payload.page,
            chunk_index: record.payload.chunk_index,
            score: record.score,
        }
    }
}

/// Generated answer with the sources it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

impl Answer {
    pub fn no_context(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: NO_CONTEXT_ANSWER.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Event emitted by a streaming answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerEvent {
    /// Next fragment of the answer text.
    Delta { content: String },
    /// Terminal: the answer completed.
    Done { sources: Vec<SourceRef> },
    /// Terminal: generation failed; fragments already emitted are not an answer.
    Failed { message: String },
}

impl AnswerEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnswerEvent::Delta { .. })
    }
}

/// Audit entry for an answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub owner_id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub created_at: DateTime<Utc>,
}

impl QueryRecord {
    pub fn from_answer(owner_id: impl Into<String>, answer: &Answer) -> Self {
        Self {
            owner_id: owner_id.into(),
            question: answer.question.clone(),
            answer: answer.answer.clone(),
            sources: answer.sources.clone(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkPayload;

    #[test]
    fn test_source_ref_from_record() {
        let record = ScoredRecord {
            id: "p1".to_string(),
            score: 0.9,
            payload: ChunkPayload {
                document_id: "d1".to_string(),
                owner_id: "alice".to_string(),
                filename: "policy.md".to_string(),
                file_type: ".md".to_string(),
                chunk_index: 2,
                content: "Returns accepted within 30 days".to_string(),
                page: Some(4),
                offset: None,
            },
        };
        let source = SourceRef::from(&record);
        assert_eq!(source.filename, "policy.md");
        assert_eq!(source.page, Some(4));
        assert_eq!(source.chunk_index, 2);
    }

    #[test]
    fn test_event_terminality() {
        assert!(!AnswerEvent::Delta { content: "a".to_string() }.is_terminal());
        assert!(AnswerEvent::Done { sources: vec![] }.is_terminal());
        assert!(AnswerEvent::Failed { message: "x".to_string() }.is_terminal());
    }

    #[test]
    fn test_no_context_answer() {
        let answer = Answer::no_context("What is the return policy?");
        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert!(answer.sources.is_empty());
    }
}
