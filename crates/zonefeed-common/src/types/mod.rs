//! Common types used across zonefeed

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ZonefeedError;

/// Maximum length (in characters) of a persisted error message
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

// ============================================================================
// Zone Records
// ============================================================================

/// DNS record types kept from zone files
///
/// Every other type found in a zone file (DS, RRSIG, NSEC, ...) is skipped
/// by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    Ns,
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Soa,
}

impl RecordType {
    /// All supported record types
    pub const ALL: [RecordType; 7] = [
        RecordType::Ns,
        RecordType::A,
        RecordType::Aaaa,
        RecordType::Cname,
        RecordType::Mx,
        RecordType::Txt,
        RecordType::Soa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Ns => "NS",
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Soa => "SOA",
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = ZonefeedError;

    /// Parse a record type keyword, ignoring ASCII case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ZonefeedError::UnsupportedRecordType(s.to_string()))
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DNS record parsed from a zone file
///
/// Produced by the parser and consumed once by a storage insert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneRecord {
    /// Owner name without the trailing dot (e.g., "example.com")
    pub domain_name: String,
    /// Top-level domain the zone file belongs to (e.g., "com")
    pub tld: String,
    pub record_type: RecordType,
    /// Record data without the trailing dot
    pub record_data: String,
    /// Time to live in seconds
    pub ttl: u32,
    /// Date the zone file was downloaded
    pub download_date: NaiveDate,
}

// ============================================================================
// Download Results and Logs
// ============================================================================

/// Terminal outcome of one TLD in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    #[default]
    Success,
    Failed,
    /// File parsed completely but some chunks could not be stored
    Partial,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Success => "success",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Partial => "partial",
        }
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = ZonefeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(DownloadStatus::Success),
            "failed" => Ok(DownloadStatus::Failed),
            "partial" => Ok(DownloadStatus::Partial),
            other => Err(ZonefeedError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of downloading (and later parsing) one zone file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DownloadResult {
    pub tld: String,
    /// Local path of the downloaded file (empty when the download failed)
    pub file_path: String,
    /// File size in bytes
    pub file_size: u64,
    pub download_duration_secs: u64,
    pub records_count: u64,
    pub parse_duration_secs: u64,
    pub status: DownloadStatus,
    pub error_message: Option<String>,
}

impl DownloadResult {
    /// Create a successful download result
    pub fn success(
        tld: impl Into<String>,
        file_path: impl Into<String>,
        file_size: u64,
        download_duration_secs: u64,
    ) -> Self {
        Self {
            tld: tld.into(),
            file_path: file_path.into(),
            file_size,
            download_duration_secs,
            status: DownloadStatus::Success,
            ..Default::default()
        }
    }

    /// Create a failed result; the message is truncated to a bounded length
    pub fn failed(tld: impl Into<String>, message: &str, download_duration_secs: u64) -> Self {
        Self {
            tld: tld.into(),
            download_duration_secs,
            status: DownloadStatus::Failed,
            error_message: Some(truncate_error_message(message)),
            ..Default::default()
        }
    }

    /// Mark this result as failed after a successful download
    pub fn fail(&mut self, message: &str) {
        self.status = DownloadStatus::Failed;
        self.error_message = Some(truncate_error_message(message));
    }

    /// Mark this result as partially stored
    pub fn mark_partial(&mut self, message: &str) {
        self.status = DownloadStatus::Partial;
        self.error_message = Some(truncate_error_message(message));
    }

    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == DownloadStatus::Failed
    }
}

/// Persisted log entry for a processed TLD (append-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLog {
    /// Assigned by the store
    pub id: Option<i64>,
    pub tld: String,
    pub file_size: u64,
    pub records_count: u64,
    pub download_duration_secs: u64,
    pub parse_duration_secs: u64,
    pub status: DownloadStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DownloadLog {
    /// Project a download result into a log entry
    pub fn from_result(
        result: &DownloadResult,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            tld: result.tld.clone(),
            file_size: result.file_size,
            records_count: result.records_count,
            download_duration_secs: result.download_duration_secs,
            parse_duration_secs: result.parse_duration_secs,
            status: result.status,
            error_message: result.error_message.clone(),
            started_at,
            completed_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }
}

/// Truncate an error message to [`MAX_ERROR_MESSAGE_LEN`] characters
pub fn truncate_error_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_ERROR_MESSAGE_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

// ============================================================================
// Job Status
// ============================================================================

/// State of the download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
}

/// Progress of the current (or last) full download run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobStatus {
    pub state: JobState,
    pub current_tld: Option<String>,
    /// 0-100
    pub progress_percent: u8,
    pub total_tlds: usize,
    pub completed_tlds: usize,
    pub started_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    pub fn is_idle(&self) -> bool {
        self.state == JobState::Idle
    }

    /// Enter the running state with a fresh progress counter
    pub fn start(&mut self, total_tlds: usize) {
        self.state = JobState::Running;
        self.current_tld = None;
        self.total_tlds = total_tlds;
        self.completed_tlds = 0;
        self.progress_percent = 0;
        self.started_at = Some(Utc::now());
    }

    /// Record that `completed` of `total` TLDs are done
    pub fn update_progress(&mut self, completed: usize, total: usize, current_tld: &str) {
        self.completed_tlds = completed;
        self.total_tlds = total;
        self.current_tld = Some(current_tld.to_string());
        self.progress_percent = progress_percent(completed, total);
    }

    /// Return to idle; progress reads 100 after every run
    pub fn complete(&mut self) {
        self.state = JobState::Idle;
        self.current_tld = None;
        self.progress_percent = 100;
    }
}

/// `floor(completed / total * 100)`, or 0 when there is nothing to do
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u128;
    ((completed * 100) / total as u128) as u8
}

// ============================================================================
// Run Summary
// ============================================================================

/// Aggregate outcome of one full run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSummary {
    pub total_tlds: usize,
    pub successful_tlds: usize,
    pub failed_tlds: usize,
    pub total_records: u64,
    /// Wall-clock duration in seconds
    pub total_duration_secs: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DownloadSummary {
    /// Summary of a run that found nothing to download
    pub fn empty(started_at: DateTime<Utc>) -> Self {
        let completed_at = Utc::now();
        Self {
            total_tlds: 0,
            successful_tlds: 0,
            failed_tlds: 0,
            total_records: 0,
            total_duration_secs: elapsed_secs(started_at, completed_at),
            started_at,
            completed_at,
        }
    }

    /// Aggregate per-TLD results into a summary
    ///
    /// `total_tlds` is the number of approved TLDs. It can exceed
    /// `successful_tlds + failed_tlds` when a stop left TLDs unprocessed.
    pub fn from_results(
        results: &[DownloadResult],
        total_tlds: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        // Partial TLDs stored data, so they count as successful
        let successful: Vec<_> = results.iter().filter(|r| !r.is_failed()).collect();
        Self {
            total_tlds: total_tlds.max(results.len()),
            successful_tlds: successful.len(),
            failed_tlds: results.len() - successful.len(),
            total_records: successful.iter().map(|r| r.records_count).sum(),
            total_duration_secs: elapsed_secs(started_at, completed_at),
            started_at,
            completed_at,
        }
    }
}

fn elapsed_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_seconds().max(0) as u64
}
