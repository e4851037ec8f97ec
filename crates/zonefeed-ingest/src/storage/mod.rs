//! Storage port
//!
//! The pipeline only talks to storage through [`ZoneStore`]. Concurrent
//! writers never share a handle: each one asks a [`StoreFactory`] for its
//! own. Implementations must tolerate duplicate records (at-least-once
//! delivery); the logical key is `(domain_name, tld, record_type,
//! record_data, download_date)`.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::{PgStore, PgStoreFactory};

use async_trait::async_trait;
use std::borrow::Cow;
use zonefeed_common::types::{DownloadLog, ZoneRecord};

/// Settings key holding the JSON summary of the last run
pub const LAST_SUMMARY_KEY: &str = "last_download_summary";

/// Longest text value written to storage
pub const MAX_FIELD_LEN: usize = 65_535;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage connection failed: {0}")]
    Connection(String),

    #[error("Storage query failed: {0}")]
    Query(String),

    #[error("Storage rejected the write: {0}")]
    Rejected(String),
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => StorageError::Connection(err.to_string()),
            sqlx::Error::Database(_) => StorageError::Rejected(err.to_string()),
            _ => StorageError::Query(err.to_string()),
        }
    }
}

/// One storage handle
#[async_trait]
pub trait ZoneStore: Send + Sync {
    /// Insert a batch of records, returning how many were newly stored
    ///
    /// Records whose logical key already exists are ignored.
    async fn insert_zone_records(&self, records: &[ZoneRecord]) -> Result<u64>;

    /// Append a download log entry, returning its id
    async fn log_download(&self, log: &DownloadLog) -> Result<i64>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Remove every stored record of a TLD, returning how many were removed
    async fn delete_records_for_tld(&self, tld: &str) -> Result<u64>;
}

/// Opens independent storage handles
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ZoneStore>>;
}

/// Strip NUL bytes and cap the length of a text value
pub fn sanitize_field(value: &str) -> Cow<'_, str> {
    let needs_strip = value.contains('\0');
    let too_long = value.len() > MAX_FIELD_LEN;
    if !needs_strip && !too_long {
        return Cow::Borrowed(value);
    }

    let mut cleaned: String = if needs_strip {
        value.chars().filter(|c| *c != '\0').collect()
    } else {
        value.to_string()
    };
    if cleaned.len() > MAX_FIELD_LEN {
        let mut end = MAX_FIELD_LEN;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
    }
    Cow::Owned(cleaned)
}
