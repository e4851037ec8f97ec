//! Zonefeed Ingest Library
//!
//! Downloads DNS zone files from the ICANN Centralized Zone Data Service,
//! parses them and stores the records.
//!
//! # Components
//!
//! - **czds**: authenticated client with token caching and retry
//! - **zone**: streaming parser for gzip-compressed zone files
//! - **pipeline**: bounded producer/consumer chunk processor for large files
//! - **storage**: storage port with in-memory and PostgreSQL implementations
//! - **orchestrator**: sequential and parallel download runs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zonefeed_ingest::config::IngestConfig;
//! use zonefeed_ingest::czds::CzdsClient;
//! use zonefeed_ingest::orchestrator::IngestOrchestrator;
//! use zonefeed_ingest::storage::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let client = Arc::new(CzdsClient::new(config.czds.clone(), config.retry)?);
//!     let orchestrator = IngestOrchestrator::new(client, Arc::new(MemoryStore::new()), config);
//!
//!     if let Some(summary) = orchestrator.run_full_download().await? {
//!         println!("{} records", summary.total_records);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod czds;
pub mod orchestrator;
pub mod pipeline;
pub mod storage;
pub mod zone;

pub use config::IngestConfig;
pub use czds::{CzdsClient, CzdsError};
pub use orchestrator::{IngestOrchestrator, ParallelOrchestrator, RunError};
