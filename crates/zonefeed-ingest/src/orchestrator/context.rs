//! Per-run collaborators and the per-TLD workflow

use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use zonefeed_common::types::{DownloadLog, DownloadResult, DownloadSummary};

use super::job::{JobTracker, RunGuard};
use super::{batch, RunError};
use crate::config::{IngestConfig, ProcessorConfig, RetentionPolicy};
use crate::czds::CzdsClient;
use crate::pipeline::{ChunkOutcome, ChunkProcessor, PipelineError};
use crate::storage::{self, StorageError, StoreFactory, ZoneStore, LAST_SUMMARY_KEY};

/// How a downloaded file is parsed and stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStrategy {
    /// Batch loop below `threshold` bytes, chunk processor at or above it
    BySize {
        threshold: u64,
        processor: ProcessorConfig,
    },
    /// Always the chunk processor
    Chunked(ProcessorConfig),
}

impl ProcessingStrategy {
    fn uses_chunks(&self, file_size: u64) -> bool {
        match self {
            ProcessingStrategy::BySize { threshold, .. } => file_size >= *threshold,
            ProcessingStrategy::Chunked(_) => true,
        }
    }

    fn processor(&self) -> ProcessorConfig {
        match self {
            ProcessingStrategy::BySize { processor, .. } => *processor,
            ProcessingStrategy::Chunked(processor) => *processor,
        }
    }
}

/// Everything a run needs, shared by both orchestrators
pub struct RunContext {
    client: Arc<CzdsClient>,
    factory: Arc<dyn StoreFactory>,
    /// Dedicated handle for run logs, settings and deletes
    run_log: Mutex<Option<Box<dyn ZoneStore>>>,
    tracker: JobTracker,
    config: IngestConfig,
}

impl RunContext {
    pub fn new(
        client: Arc<CzdsClient>,
        factory: Arc<dyn StoreFactory>,
        config: IngestConfig,
    ) -> Self {
        Self {
            client,
            factory,
            run_log: Mutex::new(None),
            tracker: JobTracker::new(),
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn client(&self) -> &CzdsClient {
        &self.client
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Ask the active run to stop at the next TLD or chunk boundary
    ///
    /// Ignored while idle, so it never affects a later run or a single-TLD call.
    pub fn stop(&self) {
        if self.tracker.request_stop() {
            info!("Stop requested");
        } else {
            debug!("No run active, ignoring stop request");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tracker.stop_requested()
    }

    /// Authenticate and list TLDs for a run that has just begun
    pub(crate) async fn prepare_run(&self, guard: &RunGuard<'_>) -> Result<Vec<String>, RunError> {
        self.client.authenticate().await.map_err(|e| {
            error!(error = %e, "Authentication failed, aborting run");
            RunError::from(e)
        })?;

        let tlds = self.client.get_approved_tlds().await.map_err(|e| {
            error!(error = %e, "Could not list approved TLDs, aborting run");
            RunError::from_listing(e)
        })?;

        guard.set_total(tlds.len());
        info!(count = tlds.len(), "Starting download run");
        Ok(tlds)
    }

    /// Record and persist the summary of a finished run
    pub(crate) async fn finish_run(&self, summary: &DownloadSummary) {
        info!(
            total_tlds = summary.total_tlds,
            successful = summary.successful_tlds,
            failed = summary.failed_tlds,
            records = summary.total_records,
            duration_secs = summary.total_duration_secs,
            "Download run finished"
        );
        self.tracker.set_last_summary(summary.clone());

        let value = match serde_json::to_string(summary) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Could not serialize run summary");
                return;
            },
        };
        let mut slot = self.run_log.lock().await;
        let result = match self.run_log_store(&mut slot).await {
            Ok(store) => store.set_setting(LAST_SUMMARY_KEY, &value).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "Could not persist run summary");
            *slot = None;
        }
    }

    /// Read the summary persisted by the last completed run
    pub async fn load_persisted_summary(&self) -> Result<Option<DownloadSummary>, RunError> {
        let mut slot = self.run_log.lock().await;
        let store = self
            .run_log_store(&mut slot)
            .await
            .map_err(|e| RunError::Internal(e.to_string()))?;
        let value = store
            .get_setting(LAST_SUMMARY_KEY)
            .await
            .map_err(|e| RunError::Internal(e.to_string()))?;

        value
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(|e| RunError::Internal(format!("Invalid persisted summary: {e}")))
    }

    async fn run_log_store<'a>(
        &self,
        slot: &'a mut Option<Box<dyn ZoneStore>>,
    ) -> storage::Result<&'a dyn ZoneStore> {
        if slot.is_none() {
            *slot = Some(self.factory.connect().await?);
        }
        slot.as_deref()
            .ok_or_else(|| StorageError::Connection("run log handle unavailable".to_string()))
    }

    /// Download, parse, store and log one TLD
    ///
    /// Never fails; the outcome is in the returned result's status. `stop`
    /// is the active run's flag, or a fresh one outside a run.
    pub async fn process_tld(
        &self,
        tld: &str,
        date: NaiveDate,
        strategy: ProcessingStrategy,
        stop: Arc<AtomicBool>,
    ) -> DownloadResult {
        let started_at = Utc::now();

        if self.config.retention == RetentionPolicy::ReplaceExisting {
            self.clear_tld(tld).await;
        }

        let mut result = self
            .client
            .download_zone_file_dated(tld, &self.config.temp_dir, date)
            .await;

        if result.is_success() {
            let path = PathBuf::from(&result.file_path);
            self.parse_and_store(&mut result, &path, date, strategy, stop)
                .await;
            remove_download(&path).await;
        }

        self.log_result(&result, started_at).await;
        result
    }

    async fn parse_and_store(
        &self,
        result: &mut DownloadResult,
        path: &Path,
        date: NaiveDate,
        strategy: ProcessingStrategy,
        stop: Arc<AtomicBool>,
    ) {
        let tld = result.tld.clone();
        let parse_started = Instant::now();

        let outcome = if strategy.uses_chunks(result.file_size) {
            info!(
                tld = %tld,
                size_mb = result.file_size / 1_000_000,
                "Large zone file, using chunk processor"
            );
            ChunkProcessor::new(self.factory.clone(), strategy.processor())
                .with_stop_flag(stop)
                .process(&tld, path, date)
                .await
                .map(|outcome| (outcome.records_inserted, Some(outcome)))
        } else {
            self.insert_batches(&tld, path, date)
                .await
                .map(|records| (records, None))
        };
        result.parse_duration_secs = parse_started.elapsed().as_secs();

        match outcome {
            Ok((records, chunks)) => {
                result.records_count = records;
                if let Some(chunks) = chunks.filter(|c| !c.is_complete()) {
                    result.mark_partial(&partial_message(&tld, &chunks));
                    warn!(tld = %tld, records, "Zone file only partially stored");
                } else {
                    info!(
                        tld = %tld,
                        records,
                        parse_duration_secs = result.parse_duration_secs,
                        "Zone file stored"
                    );
                }
            },
            Err(e) => {
                error!(tld = %tld, error = %e, "Zone file processing failed");
                result.fail(&format!("Processing failed for {tld}: {e}"));
            },
        }
    }

    async fn insert_batches(
        &self,
        tld: &str,
        path: &Path,
        date: NaiveDate,
    ) -> Result<u64, PipelineError> {
        batch::insert_in_batches(
            self.factory.as_ref(),
            tld,
            path,
            date,
            self.config.batch_size,
            &self.config.processor,
        )
        .await
    }

    async fn clear_tld(&self, tld: &str) {
        let mut slot = self.run_log.lock().await;
        let result = match self.run_log_store(&mut slot).await {
            Ok(store) => store.delete_records_for_tld(tld).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(deleted) => info!(tld = %tld, deleted, "Removed existing records"),
            Err(e) => {
                warn!(tld = %tld, error = %e, "Could not remove existing records");
                *slot = None;
            },
        }
    }

    async fn log_result(&self, result: &DownloadResult, started_at: DateTime<Utc>) {
        let log = DownloadLog::from_result(result, started_at, Utc::now());
        let mut slot = self.run_log.lock().await;
        let logged = match self.run_log_store(&mut slot).await {
            Ok(store) => store.log_download(&log).await,
            Err(e) => Err(e),
        };
        match logged {
            Ok(id) => debug!(tld = %result.tld, log_id = id, status = %result.status, "Download logged"),
            Err(e) => {
                warn!(tld = %result.tld, error = %e, "Could not write download log");
                *slot = None;
            },
        }
    }
}

fn partial_message(tld: &str, outcome: &ChunkOutcome) -> String {
    if outcome.failed_chunks.is_empty() {
        return format!("Processing of {tld} stopped before completion");
    }
    format!(
        "{} of {} chunks failed for {tld}: {}",
        outcome.failed_chunks.len(),
        outcome.failed_chunks.len() + outcome.chunks_processed,
        outcome.failed_chunks.join("; ")
    )
}

async fn remove_download(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed downloaded file"),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove downloaded file"),
    }
}
