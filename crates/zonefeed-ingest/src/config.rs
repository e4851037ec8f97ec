//! Ingestion configuration
//!
//! Everything is read from environment variables with defaults that match
//! a production CZDS deployment. Tests build configs directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::zone::ChunkConfig;

/// Default CZDS authentication endpoint
pub const DEFAULT_AUTH_URL: &str = "https://account-api.icann.org/api/authenticate";
/// Default CZDS API base URL
pub const DEFAULT_API_URL: &str = "https://czds-api.icann.org";

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub czds: CzdsConfig,
    pub retry: RetryConfig,
    /// Directory where zone files are downloaded
    pub temp_dir: PathBuf,
    /// Records per insert in the small-file batch loop
    pub batch_size: usize,
    /// Files at or above this size (bytes) go through the chunk processor
    pub large_file_threshold: u64,
    pub processor: ProcessorConfig,
    pub parallel: ParallelConfig,
    pub retention: RetentionPolicy,
    /// PostgreSQL connection string, when storing to a database
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
}

/// CZDS account and endpoint settings
#[derive(Clone, Serialize, Deserialize)]
pub struct CzdsConfig {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub auth_url: String,
    pub api_url: String,
    /// Timeout for authentication and metadata calls
    pub request_timeout_secs: u64,
    /// Timeout for a whole zone file download
    pub download_timeout_secs: u64,
    /// Cached tokens older than this are refreshed before use
    pub token_refresh_secs: u64,
}

impl std::fmt::Debug for CzdsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CzdsConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .field("auth_url", &self.auth_url)
            .field("api_url", &self.api_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("token_refresh_secs", &self.token_refresh_secs)
            .finish()
    }
}

/// Retry and backoff settings for remote calls
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts that consume a backoff delay
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Wait used when a 429 carries no usable Retry-After header
    pub default_retry_after_secs: u64,
    /// 429 waits allowed per call
    pub max_rate_limit_waits: u32,
}

/// Chunk processor settings used by the sequential orchestrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub workers: usize,
    pub chunk_size: usize,
    /// Pause after each chunk, throttles the producer
    pub chunk_delay_ms: u64,
    /// Release parser buffers every N chunks
    pub gc_interval: usize,
    /// Attempts per chunk insert
    pub insert_attempts: u32,
    /// Linear backoff step between insert attempts
    pub insert_backoff_ms: u64,
}

/// Parallel orchestrator settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParallelConfig {
    /// TLDs processed at the same time
    pub download_workers: usize,
    /// Chunk processor consumers per TLD
    pub parse_workers: usize,
    pub chunk_size: usize,
}

/// What happens to stored records of a TLD before it is re-ingested
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep records of earlier download dates
    #[default]
    PreserveHistory,
    /// Delete all records of the TLD before downloading it again
    ReplaceExisting,
}

impl std::str::FromStr for RetentionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preserve" | "preserve_history" => Ok(RetentionPolicy::PreserveHistory),
            "replace" | "replace_existing" => Ok(RetentionPolicy::ReplaceExisting),
            _ => Err(anyhow::anyhow!(
                "Invalid retention policy: {}. Must be 'preserve_history' or 'replace_existing'",
                s
            )),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let retention = match std::env::var("INGEST_RETENTION_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => RetentionPolicy::default(),
        };

        let config = Self {
            czds: CzdsConfig::from_env(),
            retry: RetryConfig::from_env(),
            temp_dir: std::env::var("INGEST_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("zonefeed")),
            batch_size: env_or("INGEST_BATCH_SIZE", 10_000),
            large_file_threshold: env_or("INGEST_LARGE_FILE_THRESHOLD", 100_000_000),
            processor: ProcessorConfig::from_env(),
            parallel: ParallelConfig::from_env(),
            retention,
            database_url: std::env::var("DATABASE_URL").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("INGEST_BATCH_SIZE must be greater than 0");
        }
        self.czds.validate()?;
        self.retry.validate()?;
        self.processor.validate()?;
        self.parallel.validate()?;
        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            czds: CzdsConfig::default(),
            retry: RetryConfig::default(),
            temp_dir: std::env::temp_dir().join("zonefeed"),
            batch_size: 10_000,
            large_file_threshold: 100_000_000,
            processor: ProcessorConfig::default(),
            parallel: ParallelConfig::default(),
            retention: RetentionPolicy::default(),
            database_url: None,
        }
    }
}

impl CzdsConfig {
    /// Load CZDS settings from `CZDS_*` variables
    pub fn from_env() -> Self {
        Self {
            username: std::env::var("CZDS_USERNAME").unwrap_or_default(),
            password: std::env::var("CZDS_PASSWORD").unwrap_or_default(),
            auth_url: std::env::var("CZDS_AUTH_URL")
                .unwrap_or_else(|_| DEFAULT_AUTH_URL.to_string()),
            api_url: std::env::var("CZDS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            request_timeout_secs: env_or("CZDS_REQUEST_TIMEOUT_SECS", 30),
            download_timeout_secs: env_or("CZDS_DOWNLOAD_TIMEOUT_SECS", 1800),
            token_refresh_secs: env_or("CZDS_TOKEN_REFRESH_SECS", 3000),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.username.is_empty() || self.password.is_empty() {
            anyhow::bail!("CZDS_USERNAME and CZDS_PASSWORD must be set");
        }
        if self.request_timeout_secs == 0 || self.download_timeout_secs == 0 {
            anyhow::bail!("CZDS timeouts must be greater than 0");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn token_refresh_after(&self) -> Duration {
        Duration::from_secs(self.token_refresh_secs)
    }
}

impl Default for CzdsConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 30,
            download_timeout_secs: 1800,
            token_refresh_secs: 3000, // 50 minutes
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_or("CZDS_MAX_RETRIES", defaults.max_retries),
            base_delay_ms: env_or("CZDS_RETRY_BASE_DELAY_MS", defaults.base_delay_ms),
            max_delay_ms: env_or("CZDS_RETRY_MAX_DELAY_MS", defaults.max_delay_ms),
            default_retry_after_secs: env_or(
                "CZDS_DEFAULT_RETRY_AFTER_SECS",
                defaults.default_retry_after_secs,
            ),
            max_rate_limit_waits: env_or(
                "CZDS_MAX_RATE_LIMIT_WAITS",
                defaults.max_rate_limit_waits,
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retries == 0 {
            anyhow::bail!("CZDS_MAX_RETRIES must be greater than 0");
        }
        if self.base_delay_ms > self.max_delay_ms {
            anyhow::bail!("CZDS_RETRY_BASE_DELAY_MS must not exceed CZDS_RETRY_MAX_DELAY_MS");
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            default_retry_after_secs: 60,
            max_rate_limit_waits: 10,
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: env_or("INGEST_CHUNK_WORKERS", defaults.workers),
            chunk_size: env_or("INGEST_CHUNK_SIZE", defaults.chunk_size),
            chunk_delay_ms: env_or("INGEST_CHUNK_DELAY_MS", defaults.chunk_delay_ms),
            gc_interval: env_or("INGEST_GC_INTERVAL", defaults.gc_interval),
            insert_attempts: env_or("INGEST_INSERT_ATTEMPTS", defaults.insert_attempts),
            insert_backoff_ms: env_or("INGEST_INSERT_BACKOFF_MS", defaults.insert_backoff_ms),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("INGEST_CHUNK_WORKERS must be greater than 0");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("INGEST_CHUNK_SIZE must be greater than 0");
        }
        if self.insert_attempts == 0 {
            anyhow::bail!("INGEST_INSERT_ATTEMPTS must be greater than 0");
        }
        Ok(())
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn insert_backoff(&self) -> Duration {
        Duration::from_millis(self.insert_backoff_ms)
    }

    /// Parser chunking derived from these settings
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_size: self.chunk_size,
            chunk_delay: self.chunk_delay(),
            gc_interval: self.gc_interval,
        }
    }

    /// Processor settings for one TLD of a parallel run
    pub fn for_parallel(&self, parallel: &ParallelConfig) -> Self {
        Self {
            workers: parallel.parse_workers,
            chunk_size: parallel.chunk_size,
            // Throughput comes from the worker pools, no throttling
            chunk_delay_ms: 0,
            gc_interval: self.gc_interval.max(1) * 2,
            ..*self
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            chunk_size: 50_000,
            chunk_delay_ms: 100,
            gc_interval: 5,
            insert_attempts: 3,
            insert_backoff_ms: 1_000,
        }
    }
}

impl ParallelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            download_workers: env_or("INGEST_DOWNLOAD_WORKERS", defaults.download_workers),
            parse_workers: env_or("INGEST_PARSE_WORKERS", defaults.parse_workers),
            chunk_size: env_or("INGEST_PARALLEL_CHUNK_SIZE", defaults.chunk_size),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.download_workers == 0 {
            anyhow::bail!("INGEST_DOWNLOAD_WORKERS must be greater than 0");
        }
        if self.parse_workers == 0 {
            anyhow::bail!("INGEST_PARSE_WORKERS must be greater than 0");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("INGEST_PARALLEL_CHUNK_SIZE must be greater than 0");
        }
        Ok(())
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            download_workers: 4,
            parse_workers: 8,
            chunk_size: 100_000,
        }
    }
}
