//! Error types for profmeta
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using MetaError
pub type Result<T> = std::result::Result<T, MetaError>;

/// Unified error type for profmeta operations
#[derive(Debug, Error)]
pub enum MetaError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    /// Transaction or iterator failure reported by the KV engine
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    /// A stored value does not match the record layout
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Sequence Errors
    // -------------------------------------------------------------------------
    /// A lease refill could not be made durable
    #[error("Sequence allocation failed for prefix {prefix:?}: {reason}")]
    Allocation { prefix: String, reason: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller-supplied value outside its domain (e.g. an inverted time window)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl MetaError {
    /// Build an allocation error, rendering the prefix lossily for display
    pub(crate) fn allocation(prefix: &[u8], reason: impl Into<String>) -> Self {
        MetaError::Allocation {
            prefix: String::from_utf8_lossy(prefix).into_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        MetaError::MalformedRecord(reason.into())
    }
}

impl From<bincode::Error> for MetaError {
    fn from(e: bincode::Error) -> Self {
        MetaError::Serialization(e.to_string())
    }
}
