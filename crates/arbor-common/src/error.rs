//! Error types for Arbor.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using ArborError.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Errors that can occur in Arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Page store errors
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: PageId, reason: String },

    // Node encoding errors
    #[error("Corrupt encoding: {0}")]
    CorruptEncoding(String),

    #[error("Field of {len} bytes exceeds the {max} byte limit")]
    FieldTooLarge { len: usize, max: usize },

    // B+ tree errors
    #[error("B+ tree invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Probe key is smaller than the previous probe")]
    InvalidProbeOrder,

    // Bulk load errors
    #[error("Bulk load input not sorted at position {position}")]
    UnsortedInput { position: u64 },

    #[error("Bulk load count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: u64, actual: u64 },

    // Descriptor errors
    #[error("Descriptor mismatch on {field}: expected {expected}, found {found}")]
    DescriptorMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
