//! Download orchestration
//!
//! A run authenticates, lists the approved TLDs, and pushes each TLD
//! through download, parse and store. [`IngestOrchestrator`] handles TLDs
//! one after the other; [`ParallelOrchestrator`] runs several at once. Both
//! share the per-TLD work in [`context::RunContext`] and the job state in
//! [`job::JobTracker`], which guarantees at most one run at a time.

pub mod batch;
pub mod context;
pub mod job;
pub mod parallel;
pub mod sequential;

pub use context::{ProcessingStrategy, RunContext};
pub use job::{JobTracker, RunGuard};
pub use parallel::ParallelOrchestrator;
pub use sequential::IngestOrchestrator;

use crate::czds::CzdsError;

/// Failures that abort a whole run
///
/// Per-TLD failures never show up here; they are recorded in the TLD's
/// download log and the run moves on.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Could not fetch approved TLDs: {0}")]
    TldList(#[source] CzdsError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RunError {
    /// Map an error from the TLD listing step
    fn from_listing(error: CzdsError) -> Self {
        match error {
            CzdsError::Authentication(message) => RunError::Authentication(message),
            other => RunError::TldList(other),
        }
    }
}

impl From<CzdsError> for RunError {
    fn from(error: CzdsError) -> Self {
        match error {
            CzdsError::Authentication(message) => RunError::Authentication(message),
            other => RunError::Internal(other.to_string()),
        }
    }
}
