//! Bytes to text extraction.
//!
//! Binary formats are out of scope: every allow-listed type is decoded as
//! (lossy) UTF-8, matching how uploads have always been indexed.

use crate::error::ExtractionError;
use crate::utils::is_allowed_extension;

/// Turns raw upload bytes into indexable text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], file_type: &str) -> Result<String, ExtractionError>;
}

/// Decodes bytes as UTF-8 for a fixed set of file types.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    file_types: Vec<String>,
}

impl PlainTextExtractor {
    pub fn new(file_types: Vec<String>) -> Self {
        Self { file_types }
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], file_type: &str) -> Result<String, ExtractionError> {
        if !is_allowed_extension(file_type, &self.file_types) {
            return Err(ExtractionError::Unsupported(file_type.to_string()));
        }
        let text = String::from_utf8_lossy(bytes);
        // Drop a UTF-8 BOM so it never lands in the first chunk
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> PlainTextExtractor {
        PlainTextExtractor::new(vec![".txt".to_string(), ".md".to_string()])
    }

    #[test]
    fn test_extracts_utf8() {
        let text = extractor().extract("héllo\nworld".as_bytes(), ".md").unwrap();
        assert_eq!(text, "héllo\nworld");
    }

    #[test]
    fn test_strips_bom_and_replaces_invalid_bytes() {
        let mut bytes = "\u{feff}abc".as_bytes().to_vec();
        bytes.push(0xff);
        let text = extractor().extract(&bytes, ".txt").unwrap();
        assert_eq!(text, "abc\u{fffd}");
    }

    #[test]
    fn test_unsupported_type() {
        assert!(matches!(
            extractor().extract(b"x", ".docx"),
            Err(ExtractionError::Unsupported(_))
        ));
    }
}
