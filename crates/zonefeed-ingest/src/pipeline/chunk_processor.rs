//! Producer/consumer processing of one zone file
//!
//! ```text
//!  spawn_blocking                 bounded mpsc (2 x workers)
//! ┌───────────────┐  Chunk{..}   ┌──────────┐   ┌────────────┐
//! │ ZoneChunks    │ ───────────▶ │  queue   │──▶│ consumer 0 │──▶ own store handle
//! │ (producer)    │ EndOfStream  │          │──▶│ consumer 1 │──▶ own store handle
//! └───────────────┘  x workers   └──────────┘   │    ...     │
//!                                                └────────────┘
//! ```
//!
//! The producer blocks when the queue is full, so memory stays bounded by
//! roughly `(2 + 1) x workers` chunks. Insert order across consumers is not
//! defined.

use chrono::NaiveDate;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zonefeed_common::types::ZoneRecord;

use super::PipelineError;
use crate::config::ProcessorConfig;
use crate::storage::{StorageError, StoreFactory, ZoneStore};
use crate::zone::{estimate_records, ChunkConfig, ParseError, ZoneParser};

/// Item on the chunk queue
#[derive(Debug)]
pub enum ChunkMessage {
    Chunk {
        records: Vec<ZoneRecord>,
        number: usize,
    },
    /// One is sent per consumer once the producer is done
    EndOfStream,
}

/// Result of processing one file
#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    /// Records in chunks that were stored successfully
    pub records_inserted: u64,
    pub chunks_processed: usize,
    /// One message per chunk that could not be stored
    pub failed_chunks: Vec<String>,
    /// A stop left chunks unread or unstored
    pub cancelled: bool,
    /// Most chunks ever sent but not yet dequeued
    pub peak_queued: usize,
    pub duration: Duration,
}

impl ChunkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty() && !self.cancelled
    }
}

#[derive(Debug, Default)]
struct Progress {
    records: u64,
    chunks: usize,
}

/// State shared by the consumers of one file
struct Shared {
    tld: String,
    factory: Arc<dyn StoreFactory>,
    config: ProcessorConfig,
    receiver: tokio::sync::Mutex<mpsc::Receiver<ChunkMessage>>,
    progress: Mutex<Progress>,
    errors: Mutex<Vec<String>>,
    /// Set by the producer when parsing failed
    abort: AtomicBool,
    stop: Arc<AtomicBool>,
    /// Set when the stop flag actually cut the file short
    cancelled: AtomicBool,
    /// Sent minus dequeued; briefly negative when a consumer wins the race
    queued: AtomicIsize,
    peak_queued: AtomicIsize,
    estimated_records: u64,
    started: Instant,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn enqueued(&self) {
        let queued = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_queued.fetch_max(queued, Ordering::SeqCst);
    }

    fn dequeued(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }

    fn record_success(&self, records: usize) {
        let workers = self.config.workers.max(1);
        let (total_records, chunks) = {
            let mut progress = self.progress.lock();
            progress.records += records as u64;
            progress.chunks += 1;
            (progress.records, progress.chunks)
        };

        if chunks % (10 * workers) == 0 {
            let elapsed = self.started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                total_records as f64 / elapsed
            } else {
                0.0
            };
            let remaining = self.estimated_records.saturating_sub(total_records);
            let eta_secs = if rate > 0.0 {
                (remaining as f64 / rate) as u64
            } else {
                0
            };
            info!(
                tld = %self.tld,
                chunks,
                records = total_records,
                records_per_sec = rate as u64,
                eta_secs,
                "Chunk progress"
            );
        }

        if chunks % (50 * workers) == 0 {
            info!(
                tld = %self.tld,
                chunks,
                records = total_records,
                elapsed_secs = self.started.elapsed().as_secs(),
                failed_chunks = self.errors.lock().len(),
                "Chunk summary"
            );
        }
    }
}

/// Parses one file on a blocking thread and stores it with N consumers
pub struct ChunkProcessor {
    factory: Arc<dyn StoreFactory>,
    config: ProcessorConfig,
    stop: Arc<AtomicBool>,
}

impl ChunkProcessor {
    pub fn new(factory: Arc<dyn StoreFactory>, config: ProcessorConfig) -> Self {
        Self {
            factory,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a stop flag with the caller
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Ask the producer and consumers to stop after their current chunk
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn workers(&self) -> usize {
        self.config.workers.max(1)
    }

    pub async fn process(
        &self,
        tld: &str,
        path: &Path,
        download_date: NaiveDate,
    ) -> Result<ChunkOutcome, PipelineError> {
        let workers = self.workers();
        let started = Instant::now();
        let estimated_records = estimate_records(path);
        let (sender, receiver) = mpsc::channel(workers * 2);

        info!(
            tld = %tld,
            workers,
            chunk_size = self.config.chunk_size,
            estimated_records,
            "Starting chunk processor"
        );

        let shared = Arc::new(Shared {
            tld: tld.to_string(),
            factory: self.factory.clone(),
            config: self.config,
            receiver: tokio::sync::Mutex::new(receiver),
            progress: Mutex::new(Progress::default()),
            errors: Mutex::new(Vec::new()),
            abort: AtomicBool::new(false),
            stop: self.stop.clone(),
            cancelled: AtomicBool::new(false),
            queued: AtomicIsize::new(0),
            peak_queued: AtomicIsize::new(0),
            estimated_records,
            started,
        });

        let consumers: Vec<_> = (0..workers)
            .map(|worker_id| tokio::spawn(consume(shared.clone(), worker_id)))
            .collect();

        let producer = {
            let shared = shared.clone();
            let parser = ZoneParser::new(tld, download_date);
            let path = path.to_path_buf();
            let chunk_config = self.config.chunk_config();
            tokio::task::spawn_blocking(move || {
                produce(&parser, &path, chunk_config, sender, workers, &shared)
            })
        };

        let produced = producer.await;
        for consumer in consumers {
            consumer.await?;
        }

        let chunks_sent = match produced? {
            Ok(chunks_sent) => chunks_sent,
            Err(e) => {
                error!(tld = %tld, error = %e, "Zone file parsing failed");
                return Err(e.into());
            },
        };

        let progress = std::mem::take(&mut *shared.progress.lock());
        let failed_chunks = std::mem::take(&mut *shared.errors.lock());
        let outcome = ChunkOutcome {
            records_inserted: progress.records,
            chunks_processed: progress.chunks,
            cancelled: shared.cancelled.load(Ordering::SeqCst),
            peak_queued: shared.peak_queued.load(Ordering::SeqCst).max(0) as usize,
            failed_chunks,
            duration: started.elapsed(),
        };

        info!(
            tld = %tld,
            records = outcome.records_inserted,
            chunks = outcome.chunks_processed,
            chunks_sent,
            failed_chunks = outcome.failed_chunks.len(),
            peak_queued = outcome.peak_queued,
            cancelled = outcome.cancelled,
            duration_secs = outcome.duration.as_secs(),
            "Chunk processor finished"
        );
        Ok(outcome)
    }
}

/// Producer body, runs on a blocking thread
fn produce(
    parser: &ZoneParser,
    path: &Path,
    chunk_config: ChunkConfig,
    sender: mpsc::Sender<ChunkMessage>,
    workers: usize,
    shared: &Shared,
) -> Result<usize, ParseError> {
    let mut sent = 0usize;
    let result = send_chunks(parser, path, chunk_config, &sender, shared, &mut sent);

    if result.is_err() {
        shared.abort.store(true, Ordering::SeqCst);
    }

    for _ in 0..workers {
        if sender.blocking_send(ChunkMessage::EndOfStream).is_err() {
            break;
        }
    }

    result.map(|_| sent)
}

fn send_chunks(
    parser: &ZoneParser,
    path: &Path,
    chunk_config: ChunkConfig,
    sender: &mpsc::Sender<ChunkMessage>,
    shared: &Shared,
    sent: &mut usize,
) -> Result<(), ParseError> {
    let mut chunks = parser.chunks(path, chunk_config)?;
    loop {
        if shared.is_stopped() {
            // Only a cancellation if the file still had chunks left
            if chunks.next().is_some() {
                shared.cancelled.store(true, Ordering::SeqCst);
                info!(tld = %shared.tld, chunks = *sent, "Stop requested, producer exiting");
            }
            break;
        }
        let Some(item) = chunks.next() else {
            break;
        };
        let (records, number) = item?;
        if sender
            .blocking_send(ChunkMessage::Chunk { records, number })
            .is_err()
        {
            warn!(tld = %shared.tld, "All consumers exited, producer stopping");
            break;
        }
        shared.enqueued();
        *sent += 1;
    }
    Ok(())
}

/// Consumer loop: dequeue, insert, repeat until an end marker
async fn consume(shared: Arc<Shared>, worker_id: usize) {
    let mut handle = match shared.factory.connect().await {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(tld = %shared.tld, worker_id, error = %e, "Could not open store handle, will retry");
            None
        },
    };

    loop {
        let message = shared.receiver.lock().await.recv().await;
        let (records, number) = match message {
            Some(ChunkMessage::Chunk { records, number }) => (records, number),
            Some(ChunkMessage::EndOfStream) | None => break,
        };
        shared.dequeued();

        if shared.abort.load(Ordering::SeqCst) {
            debug!(tld = %shared.tld, worker_id, chunk = number, "Skipping chunk after parse error");
            continue;
        }
        if shared.is_stopped() {
            shared.cancelled.store(true, Ordering::SeqCst);
            debug!(tld = %shared.tld, worker_id, chunk = number, "Skipping chunk after stop");
            continue;
        }

        let inserted = insert_with_retry(
            shared.factory.as_ref(),
            &mut handle,
            &records,
            &shared.config,
            &shared.tld,
            number,
        )
        .await;
        match inserted {
            Ok(_) => shared.record_success(records.len()),
            Err(e) => {
                error!(
                    tld = %shared.tld,
                    worker_id,
                    chunk = number,
                    error = %e,
                    "Chunk could not be stored"
                );
                shared.errors.lock().push(format!("chunk {number}: {e}"));
            },
        }
    }

    debug!(tld = %shared.tld, worker_id, "Consumer finished");
}

async fn try_insert(
    factory: &dyn StoreFactory,
    handle: &mut Option<Box<dyn ZoneStore>>,
    records: &[ZoneRecord],
) -> Result<u64, StorageError> {
    let store = match handle.take() {
        Some(store) => store,
        None => factory.connect().await?,
    };
    let result = store.insert_zone_records(records).await;
    *handle = Some(store);
    result
}

/// Up to `insert_attempts` tries with linear backoff; the handle is
/// reopened from the second failure on
pub(crate) async fn insert_with_retry(
    factory: &dyn StoreFactory,
    handle: &mut Option<Box<dyn ZoneStore>>,
    records: &[ZoneRecord],
    config: &ProcessorConfig,
    tld: &str,
    chunk: usize,
) -> Result<u64, StorageError> {
    let attempts = config.insert_attempts.max(1);
    let mut failures = 0u32;

    loop {
        let error = match try_insert(factory, handle, records).await {
            Ok(inserted) => return Ok(inserted),
            Err(e) => e,
        };

        failures += 1;
        if failures >= attempts {
            return Err(error);
        }
        if failures >= 2 {
            *handle = None;
        }

        let delay = config.insert_backoff() * failures;
        warn!(
            tld = %tld,
            chunk,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Insert failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
