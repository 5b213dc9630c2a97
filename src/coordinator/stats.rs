//! Cross-source diagnostic counters.
//!
//! One set of atomic counters per server, created on first use. Only the
//! coordinators write; observability endpoints read snapshots. Timestamps only
//! ever move forward.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

const UNSET: i64 = i64::MIN;

/// Counters of one source.
#[derive(Debug)]
pub struct SourceCounters {
    last_csv_timestamp: AtomicI64,
    last_log_timestamp: AtomicI64,
    files_processed: AtomicU64,
    events_processed: AtomicU64,
}

impl Default for SourceCounters {
    fn default() -> Self {
        Self {
            last_csv_timestamp: AtomicI64::new(UNSET),
            last_log_timestamp: AtomicI64::new(UNSET),
            files_processed: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
        }
    }
}

fn load_timestamp(cell: &AtomicI64) -> Option<DateTime<Utc>> {
    match cell.load(Ordering::Relaxed) {
        UNSET => None,
        millis => DateTime::from_timestamp_millis(millis),
    }
}

impl SourceCounters {
    fn snapshot(&self) -> SourceStatsSnapshot {
        SourceStatsSnapshot {
            last_csv_timestamp: load_timestamp(&self.last_csv_timestamp),
            last_log_timestamp: load_timestamp(&self.last_log_timestamp),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one source's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatsSnapshot {
    pub last_csv_timestamp: Option<DateTime<Utc>>,
    pub last_log_timestamp: Option<DateTime<Utc>>,
    pub files_processed: u64,
    pub events_processed: u64,
}

/// Process-lifetime counters for every source.
#[derive(Debug, Default)]
pub struct ParserCoordinatorStats {
    sources: DashMap<String, Arc<SourceCounters>>,
}

impl ParserCoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, server_id: &str) -> Arc<SourceCounters> {
        if let Some(counters) = self.sources.get(server_id) {
            return counters.clone();
        }
        self.sources
            .entry(server_id.to_string())
            .or_default()
            .clone()
    }

    /// Count one fully ingested CSV file.
    pub fn record_file(&self, server_id: &str, events: u64, file_timestamp: DateTime<Utc>) {
        let counters = self.counters(server_id);
        counters.files_processed.fetch_add(1, Ordering::Relaxed);
        counters.events_processed.fetch_add(events, Ordering::Relaxed);
        counters
            .last_csv_timestamp
            .fetch_max(file_timestamp.timestamp_millis(), Ordering::Relaxed);
    }

    /// Note the newest server-log line seen by a log processor.
    pub fn record_log_timestamp(&self, server_id: &str, timestamp: DateTime<Utc>) {
        self.counters(server_id)
            .last_log_timestamp
            .fetch_max(timestamp.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self, server_id: &str) -> Option<SourceStatsSnapshot> {
        self.sources.get(server_id).map(|c| c.snapshot())
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, SourceStatsSnapshot> {
        self.sources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}
