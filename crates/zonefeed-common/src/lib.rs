//! Zonefeed Common Library
//!
//! Shared types, logging setup, and error handling for the zonefeed workspace.
//!
//! # Overview
//!
//! - **Types**: zone records, per-TLD download results and logs, job status
//!   and run summaries
//! - **Error Handling**: common error and result types
//! - **Logging**: tracing subscriber configuration shared by all binaries
//!
//! # Example
//!
//! ```no_run
//! use zonefeed_common::types::RecordType;
//!
//! let record_type: RecordType = "ns".parse().unwrap();
//! assert_eq!(record_type.as_str(), "NS");
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, ZonefeedError};
