//! ICANN CZDS source client
//!
//! Authenticates against the ICANN account API, lists the TLDs the account
//! is approved for and streams zone files to disk. Every remote call goes
//! through the same retry loop, driven by [`retry::classify`].

pub mod client;
pub mod retry;

pub use client::{tld_from_link, verify_file_integrity, zone_file_name, CzdsClient};
pub use retry::{backoff_delay, classify, RetryAction, RetryBudget, RetryDecision};

/// Result type for CZDS operations
pub type Result<T> = std::result::Result<T, CzdsError>;

/// Errors returned by the CZDS client
#[derive(Debug, thiserror::Error)]
pub enum CzdsError {
    /// Credentials rejected or authentication exhausted its retries
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Zone file not found for TLD '{0}'")]
    NotFound(String),
}

impl CzdsError {
    pub fn status(&self) -> Option<u16> {
        match self {
            CzdsError::Http { status, .. } => Some(*status),
            CzdsError::RateLimited { .. } => Some(429),
            CzdsError::NotFound(_) => Some(404),
            CzdsError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
