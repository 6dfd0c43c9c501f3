//! Text chunking with overlap and natural break points.

use crate::error::ValidationError;
use crate::models::{ChunkStrategy, IngestionConfig};

/// Minimum width of the break-point search region, in characters.
const MIN_SEARCH_REGION: usize = 20;

/// Separator groups in priority order. Within a group the last occurrence wins.
const SEPARATORS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// A contiguous piece of extracted text.
///
/// `start` and `end` are offsets in the chunker's units: characters for the
/// character strategy, whitespace tokens for the token strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: u32,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Text chunker that splits text into overlapping chunks.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
    strategy: ChunkStrategy,
}

impl TextChunker {
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        strategy: ChunkStrategy,
    ) -> Result<Self, ValidationError> {
        if chunk_size == 0 {
            return Err(ValidationError::InvalidChunking(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ValidationError::InvalidChunking(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
            strategy,
        })
    }

    pub fn from_config(config: &IngestionConfig) -> Result<Self, ValidationError> {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.chunk_strategy,
        )
    }

    /// Split text into ordered chunks. Empty text yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        match self.strategy {
            ChunkStrategy::Characters => self.split_chars(text),
            ChunkStrategy::Tokens => self.split_tokens(text),
        }
    }

    fn split_chars(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();

        if total == 0 {
            return chunks;
        }

        let mut start = 0;
        loop {
            if start + self.chunk_size >= total {
                chunks.push(make_chunk(chunks.len(), &chars, start, total));
                break;
            }

            let window_end = start + self.chunk_size;
            let end = self.find_break_point(&chars, window_end);
            chunks.push(make_chunk(chunks.len(), &chars, start, end));

            // Strictly forward, never past the break point
            start = end.saturating_sub(self.overlap).max(start + 1).min(end);
        }

        chunks
    }

    /// Find a natural break point in the tail of the window ending at `window_end`.
    ///
    /// The returned position is just past the separator, so the separator stays
    /// with the preceding chunk. Falls back to a hard break at `window_end`.
    fn find_break_point(&self, chars: &[char], window_end: usize) -> usize {
        let region = (self.chunk_size / 5)
            .max(MIN_SEARCH_REGION)
            .min(self.chunk_size);
        let search_start = window_end - region;
        let search = &chars[search_start..window_end];

        for group in SEPARATORS {
            let best = group
                .iter()
                .filter_map(|sep| last_occurrence(search, sep).map(|pos| pos + sep.chars().count()))
                .max();
            if let Some(offset) = best {
                return search_start + offset;
            }
        }

        window_end
    }

    fn split_tokens(&self, text: &str) -> Vec<TextChunk> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let total = tokens.len();
        let stride = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();

        let mut start = 0;
        while start < total {
            let end = (start + self.chunk_size).min(total);
            chunks.push(TextChunk {
                index: chunks.len() as u32,
                text: tokens[start..end].join(" "),
                start,
                end,
            });
            if end == total {
                break;
            }
            start += stride;
        }

        chunks
    }
}

fn make_chunk(index: usize, chars: &[char], start: usize, end: usize) -> TextChunk {
    TextChunk {
        index: index as u32,
        text: chars[start..end].iter().collect(),
        start,
        end,
    }
}

/// Start of the last full occurrence of `sep` inside `haystack`.
fn last_occurrence(haystack: &[char], sep: &str) -> Option<usize> {
    let needle: Vec<char> = sep.chars().collect();
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| haystack[i..i + needle.len()] == needle[..])
}
