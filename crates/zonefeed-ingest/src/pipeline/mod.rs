//! Concurrent parse-and-store pipeline for large zone files

pub mod chunk_processor;

pub use chunk_processor::{ChunkMessage, ChunkOutcome, ChunkProcessor};
pub(crate) use chunk_processor::insert_with_retry;

use crate::storage::StorageError;
use crate::zone::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
