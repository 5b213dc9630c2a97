//! Per-source watermark state.
//!
//! Captures everything needed to resume a source without re-publishing:
//! the timestamp boundary and the names of files already ingested.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ingestion progress of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWatermark {
    pub server_id: String,
    /// Everything strictly older than this is considered consumed.
    pub last_processed_timestamp: DateTime<Utc>,
    /// Ingested file names (relative to the CSV root) and their file timestamps.
    #[serde(default)]
    pub processed_file_names: BTreeMap<String, DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SourceWatermark {
    /// A fresh watermark starting `window` before `now`.
    pub fn initial(server_id: impl Into<String>, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            server_id: server_id.into(),
            last_processed_timestamp: window_start(now, window),
            processed_file_names: BTreeMap::new(),
            updated_at: now,
        }
    }

    /// Lower bound for candidate files: the watermark, but never further back than `window`.
    pub fn cutoff(&self, now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
        self.last_processed_timestamp.max(window_start(now, window))
    }

    pub fn is_processed(&self, name: &str) -> bool {
        self.processed_file_names.contains_key(name)
    }

    /// Record a fully published file. Returns `true` if the watermark moved.
    ///
    /// The watermark advances to the file's timestamp but never past `hold`,
    /// the timestamp of the earliest file still waiting for a retry. Files
    /// beyond `hold` are kept out by name until the held file succeeds.
    pub fn mark_processed(
        &mut self,
        name: impl Into<String>,
        file_timestamp: DateTime<Utc>,
        hold: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        self.processed_file_names.insert(name.into(), file_timestamp);
        self.updated_at = now;
        self.advance(hold.map_or(file_timestamp, |hold| hold.min(file_timestamp)))
    }

    /// Move the watermark forward. Earlier timestamps are ignored.
    pub fn advance(&mut self, timestamp: DateTime<Utc>) -> bool {
        if timestamp > self.last_processed_timestamp {
            self.last_processed_timestamp = timestamp;
            true
        } else {
            false
        }
    }

    /// Forget processed names older than `cutoff`; they can never be candidates again.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.processed_file_names.len();
        self.processed_file_names.retain(|_, ts| *ts >= cutoff);
        before - self.processed_file_names.len()
    }
}

/// `now - window`, saturating at the earliest representable instant.
fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
