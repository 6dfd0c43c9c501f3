//! Records stored in the per-owner similarity index.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload stored alongside every vector; carries everything needed for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub owner_id: String,
    pub filename: String,
    pub file_type: String,
    pub chunk_index: u32,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// A point in an owner's collection.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A search hit with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

impl VectorRecord {
    /// Point id derived from the owning document and chunk position.
    pub fn generate_id(document_id: &str, chunk_index: u32) -> String {
        let name = format!("{}:{}", document_id, chunk_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn new(vector: Vec<f32>, payload: ChunkPayload) -> Self {
        Self {
            id: Self::generate_id(&payload.document_id, payload.chunk_index),
            vector,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_is_deterministic() {
        let id = VectorRecord::generate_id("abc123", 5);
        assert_eq!(id.len(), 36);
        assert_eq!(id.chars().filter(|c| *c == '-').count(), 4);
        assert_eq!(id, VectorRecord::generate_id("abc123", 5));
        assert_ne!(id, VectorRecord::generate_id("abc123", 6));
    }

    #[test]
    fn test_payload_skips_missing_optionals() {
        let payload = ChunkPayload {
            document_id: "d".to_string(),
            owner_id: "o".to_string(),
            filename: "f.txt".to_string(),
            file_type: ".txt".to_string(),
            chunk_index: 0,
            content: "text".to_string(),
            page: None,
            offset: Some(12),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("page").is_none());
        assert_eq!(json["offset"], 12);
    }
}
