//! In-process store
//!
//! Used by the CLI when no database is configured and by the tests. All
//! handles returned by [`StoreFactory::connect`] share the same state.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use zonefeed_common::types::{DownloadLog, RecordType, ZoneRecord};

use super::{Result, StorageError, StoreFactory, ZoneStore};

type RecordKey = (String, String, RecordType, String, NaiveDate);

fn record_key(record: &ZoneRecord) -> RecordKey {
    (
        record.domain_name.clone(),
        record.tld.clone(),
        record.record_type,
        record.record_data.clone(),
        record.download_date,
    )
}

#[derive(Default)]
struct MemoryState {
    keys: HashSet<RecordKey>,
    records: Vec<ZoneRecord>,
    insert_calls: Vec<usize>,
    logs: Vec<DownloadLog>,
    settings: HashMap<String, String>,
    connections: usize,
    failing_inserts: usize,
    failing_connects: usize,
    failing_deletes: bool,
}

/// Shared in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records, in insertion order
    pub fn records(&self) -> Vec<ZoneRecord> {
        self.state.lock().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn records_for_tld(&self, tld: &str) -> Vec<ZoneRecord> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.tld == tld)
            .cloned()
            .collect()
    }

    /// Size of every successful insert call, in call order
    pub fn insert_calls(&self) -> Vec<usize> {
        self.state.lock().insert_calls.clone()
    }

    pub fn logs(&self) -> Vec<DownloadLog> {
        self.state.lock().logs.clone()
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.state.lock().settings.get(key).cloned()
    }

    /// Handles opened through the factory
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Make the next `n` insert calls fail
    pub fn fail_next_inserts(&self, n: usize) {
        self.state.lock().failing_inserts = n;
    }

    /// Make the next `n` connect calls fail
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().failing_connects = n;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().failing_deletes = fail;
    }
}

#[async_trait]
impl ZoneStore for MemoryStore {
    async fn insert_zone_records(&self, records: &[ZoneRecord]) -> Result<u64> {
        let mut state = self.state.lock();
        if state.failing_inserts > 0 {
            state.failing_inserts -= 1;
            return Err(StorageError::Rejected("injected insert failure".to_string()));
        }

        state.insert_calls.push(records.len());
        let mut inserted = 0u64;
        for record in records {
            if state.keys.insert(record_key(record)) {
                state.records.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn log_download(&self, log: &DownloadLog) -> Result<i64> {
        let mut state = self.state.lock();
        let id = state.logs.len() as i64 + 1;
        let mut entry = log.clone();
        entry.id = Some(id);
        state.logs.push(entry);
        Ok(id)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_records_for_tld(&self, tld: &str) -> Result<u64> {
        let mut state = self.state.lock();
        if state.failing_deletes {
            return Err(StorageError::Query("injected delete failure".to_string()));
        }

        let before = state.records.len();
        state.records.retain(|r| r.tld != tld);
        state.keys.retain(|key| key.1 != tld);
        Ok((before - state.records.len()) as u64)
    }
}

#[async_trait]
impl StoreFactory for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn ZoneStore>> {
        let mut state = self.state.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(StorageError::Connection(
                "injected connect failure".to_string(),
            ));
        }
        state.connections += 1;
        Ok(Box::new(self.clone()))
    }
}
