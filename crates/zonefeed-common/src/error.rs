//! Error types shared across zonefeed crates

use thiserror::Error;

/// Result type alias for zonefeed operations
pub type Result<T> = std::result::Result<T, ZonefeedError>;

/// Errors that are not owned by a single pipeline stage
#[derive(Error, Debug)]
pub enum ZonefeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported record type: {0}")]
    UnsupportedRecordType(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),
}
