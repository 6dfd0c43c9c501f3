//! File utilities for ingestion.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Calculate the SHA-256 checksum of raw bytes as lower-case hex.
pub fn calculate_checksum(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    hex::encode(hash)
}

/// Lower-case extension with its leading dot (e.g. `.md`), if the name has one.
pub fn normalized_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

/// Check an extension against an allow-list, ignoring case and a missing dot.
pub fn is_allowed_extension(extension: &str, allowed: &[String]) -> bool {
    let extension = extension.trim_start_matches('.').to_lowercase();
    allowed
        .iter()
        .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&extension))
}

/// Check whether a path carries an allow-listed extension.
pub fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    path.file_name()
        .and_then(|n| normalized_extension(&n.to_string_lossy()))
        .is_some_and(|ext| is_allowed_extension(&ext, allowed))
}

/// Check whether a path (relative to a watched root) matches any glob pattern.
///
/// `*` never crosses a path separator, so `**/.*` only matches dot-named entries.
pub fn matches_any_pattern(path: &Path, patterns: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    patterns.iter().any(|pattern| {
        glob::Pattern::new(pattern)
            .map(|p| p.matches_with(&path_str, options))
            .unwrap_or(false)
    })
}
