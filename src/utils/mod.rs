//! Utility modules.

pub mod file;
pub mod retry;

pub use file::{
    calculate_checksum, has_allowed_extension, is_allowed_extension, matches_any_pattern,
    normalized_extension,
};
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
