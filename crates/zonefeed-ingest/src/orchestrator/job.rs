//! Job state shared across the orchestration boundary

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use zonefeed_common::types::{DownloadSummary, JobStatus};

/// Owns the job status, the active run's stop flag and the last run summary
///
/// The status lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct JobTracker {
    status: Mutex<JobStatus>,
    last_summary: Mutex<Option<DownloadSummary>>,
    /// Only set while a run is active
    stop: Arc<AtomicBool>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move from idle to running, or return `None` if a run is active
    pub fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut status = self.status.lock();
        if status.is_running() {
            return None;
        }
        status.start(0);
        self.stop.store(false, Ordering::SeqCst);
        debug!("Job state: idle -> running");
        Some(RunGuard { tracker: self })
    }

    /// Snapshot of the current status
    pub fn status(&self) -> JobStatus {
        self.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status.lock().is_running()
    }

    /// Flag the active run to stop; returns `false` when no run is active
    pub fn request_stop(&self) -> bool {
        let status = self.status.lock();
        if !status.is_running() {
            return false;
        }
        self.stop.store(true, Ordering::SeqCst);
        true
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn last_summary(&self) -> Option<DownloadSummary> {
        self.last_summary.lock().clone()
    }

    pub fn set_last_summary(&self, summary: DownloadSummary) {
        *self.last_summary.lock() = Some(summary);
    }
}

/// Proof of an active run; dropping it returns the job to idle
#[derive(Debug)]
pub struct RunGuard<'a> {
    tracker: &'a JobTracker,
}

impl RunGuard<'_> {
    pub fn set_total(&self, total_tlds: usize) {
        let mut status = self.tracker.status.lock();
        status.total_tlds = total_tlds;
        status.completed_tlds = 0;
        status.progress_percent = 0;
    }

    /// Stop flag of this run, for the chunk processor
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.tracker.stop.clone()
    }

    /// Record that a TLD finished, whatever its outcome
    pub fn tld_completed(&self, completed: usize, total: usize, tld: &str) {
        self.tracker
            .status
            .lock()
            .update_progress(completed, total, tld);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut status = self.tracker.status.lock();
        status.complete();
        self.tracker.stop.store(false, Ordering::SeqCst);
        debug!("Job state: running -> idle");
    }
}
