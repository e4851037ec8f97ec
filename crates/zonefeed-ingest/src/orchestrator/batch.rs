//! Simple batch loop for small zone files
//!
//! Records are parsed on a blocking thread and handed over one batch at a
//! time to a single writer, so insertion order equals parse order. Failed
//! inserts are retried like chunk inserts.

use chrono::NaiveDate;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;
use zonefeed_common::types::ZoneRecord;

use crate::config::ProcessorConfig;
use crate::pipeline::{insert_with_retry, PipelineError};
use crate::storage::{StoreFactory, ZoneStore};
use crate::zone::{ParseError, ZoneParser};

/// Parse `path` and insert its records in batches of `batch_size`
///
/// Every full batch is inserted as soon as it is complete, the final
/// partial batch as-is. Inserts use one handle from `factory` and retry
/// with `retry.insert_attempts`. Returns the number of records inserted.
pub async fn insert_in_batches(
    factory: &dyn StoreFactory,
    tld: &str,
    path: &Path,
    download_date: NaiveDate,
    batch_size: usize,
    retry: &ProcessorConfig,
) -> Result<u64, PipelineError> {
    let batch_size = batch_size.max(1);
    let (sender, mut receiver) = mpsc::channel::<Vec<ZoneRecord>>(1);

    let parser = ZoneParser::new(tld, download_date);
    let path = path.to_path_buf();
    let producer = tokio::task::spawn_blocking(move || -> Result<(), ParseError> {
        let mut batch = Vec::with_capacity(batch_size);
        for record in parser.records(&path)? {
            batch.push(record?);
            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                if sender.blocking_send(full).is_err() {
                    return Ok(());
                }
            }
        }
        if !batch.is_empty() {
            // The writer may already be gone after a storage error
            let _ = sender.blocking_send(batch);
        }
        Ok(())
    });

    let mut handle: Option<Box<dyn ZoneStore>> = None;
    let mut inserted = 0u64;
    let mut batches = 0usize;
    let mut write_error = None;
    while let Some(batch) = receiver.recv().await {
        match insert_with_retry(factory, &mut handle, &batch, retry, tld, batches + 1).await {
            Ok(_) => {
                inserted += batch.len() as u64;
                batches += 1;
            },
            Err(e) => {
                write_error = Some(e);
                break;
            },
        }
    }
    // Unblocks the producer if it is waiting on a full channel
    drop(receiver);

    producer.await??;
    if let Some(e) = write_error {
        return Err(e.into());
    }

    debug!(tld = %tld, records = inserted, batches, "Batch insert finished");
    Ok(inserted)
}
