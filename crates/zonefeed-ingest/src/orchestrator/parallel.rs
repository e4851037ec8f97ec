//! Parallel orchestrator: several TLDs in flight at once

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use zonefeed_common::types::{DownloadResult, DownloadSummary, JobStatus};

use super::{ProcessingStrategy, RunContext, RunError};
use crate::config::IngestConfig;
use crate::czds::CzdsClient;
use crate::storage::StoreFactory;

/// Runs full downloads with up to `download_workers` TLDs at a time
///
/// Every TLD goes through its own chunk processor with `parse_workers`
/// consumers, whatever the file size.
pub struct ParallelOrchestrator {
    ctx: RunContext,
}

impl ParallelOrchestrator {
    pub fn new(
        client: Arc<CzdsClient>,
        factory: Arc<dyn StoreFactory>,
        config: IngestConfig,
    ) -> Self {
        Self {
            ctx: RunContext::new(client, factory, config),
        }
    }

    fn strategy(&self) -> ProcessingStrategy {
        let config = self.ctx.config();
        ProcessingStrategy::Chunked(config.processor.for_parallel(&config.parallel))
    }

    /// Download and store every approved TLD
    ///
    /// Returns `Ok(None)` without doing anything if a run is already active.
    pub async fn run_full_download(&self) -> Result<Option<DownloadSummary>, RunError> {
        let Some(guard) = self.ctx.tracker().try_begin() else {
            warn!("Download run already in progress, ignoring request");
            return Ok(None);
        };
        let started_at = Utc::now();

        let tlds = self.ctx.prepare_run(&guard).await?;
        if tlds.is_empty() {
            info!("No approved TLDs, nothing to download");
            let summary = DownloadSummary::empty(started_at);
            self.ctx.finish_run(&summary).await;
            return Ok(Some(summary));
        }

        let date = started_at.date_naive();
        let strategy = self.strategy();
        let total = tlds.len();
        let workers = self.ctx.config().parallel.download_workers;
        let completed = AtomicUsize::new(0);
        let stop = guard.stop_flag();
        info!(total, workers, "Processing TLDs in parallel");

        let ctx = &self.ctx;
        let guard = &guard;
        let completed = &completed;
        let stop = &stop;
        let results: Vec<DownloadResult> = stream::iter(tlds)
            .map(|tld| async move {
                if ctx.is_stopped() {
                    return None;
                }
                let result = ctx.process_tld(&tld, date, strategy, stop.clone()).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                guard.tld_completed(done, total, &tld);
                info!(tld = %tld, progress = %format!("{done}/{total}"), status = %result.status, "TLD finished");
                Some(result)
            })
            .buffer_unordered(workers)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        if results.len() < total {
            warn!(completed = results.len(), total, "Run stopped before all TLDs were processed");
        }

        let summary = DownloadSummary::from_results(&results, total, started_at);
        self.ctx.finish_run(&summary).await;
        Ok(Some(summary))
    }

    /// Download and store a single TLD outside a full run
    ///
    /// Not affected by [`stop`](Self::stop), which only applies to full runs.
    pub async fn process_tld(&self, tld: &str) -> DownloadResult {
        let stop = Arc::new(AtomicBool::new(false));
        self.ctx
            .process_tld(tld, Utc::now().date_naive(), self.strategy(), stop)
            .await
    }

    pub fn status(&self) -> JobStatus {
        self.ctx.tracker().status()
    }

    pub fn is_running(&self) -> bool {
        self.ctx.tracker().is_running()
    }

    pub fn last_summary(&self) -> Option<DownloadSummary> {
        self.ctx.tracker().last_summary()
    }

    /// Stop the active run; TLDs not yet started are skipped
    pub fn stop(&self) {
        self.ctx.stop();
    }

    pub async fn load_persisted_summary(&self) -> Result<Option<DownloadSummary>, RunError> {
        self.ctx.load_persisted_summary().await
    }
}
