//! Sequential orchestrator: one TLD at a time

use chrono::Utc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};
use zonefeed_common::types::{DownloadResult, DownloadSummary, JobStatus};

use super::{ProcessingStrategy, RunContext, RunError};
use crate::config::IngestConfig;
use crate::czds::CzdsClient;
use crate::storage::StoreFactory;

/// Runs full downloads TLD by TLD
///
/// Small files go through the batch loop, files at or above
/// `large_file_threshold` through the chunk processor.
pub struct IngestOrchestrator {
    ctx: RunContext,
}

impl IngestOrchestrator {
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
        ProcessingStrategy::BySize {
            threshold: config.large_file_threshold,
            processor: config.processor,
        }
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
        let stop = guard.stop_flag();
        let mut results = Vec::with_capacity(total);

        for (index, tld) in tlds.iter().enumerate() {
            if self.ctx.is_stopped() {
                warn!(completed = index, total, "Run stopped before all TLDs were processed");
                break;
            }
            info!(tld = %tld, progress = %format!("{}/{}", index + 1, total), "Processing TLD");

            let result = self.ctx.process_tld(tld, date, strategy, stop.clone()).await;
            guard.tld_completed(index + 1, total, tld);
            results.push(result);
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

    /// Stop the active run at the next TLD or chunk boundary
    pub fn stop(&self) {
        self.ctx.stop();
    }

    pub async fn load_persisted_summary(&self) -> Result<Option<DownloadSummary>, RunError> {
        self.ctx.load_persisted_summary().await
    }
}
