//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence during ingestion.
//! Events implement the `InternalEvent` trait which records the corresponding
//! Prometheus metric. Per-source metrics carry a `server_id` label.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::error::RemoteOperation;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// File and event counters
// ============================================================================

/// Event emitted when a CSV file has been fully ingested.
pub struct FileProcessed {
    pub server_id: String,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(server_id = %self.server_id, "File processed");
        counter!("killfeed_files_processed_total", "server_id" => self.server_id).increment(1);
    }
}

/// Stage at which a file failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Fetch,
    Parse,
    Publish,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Fetch => "fetch",
            FailureStage::Parse => "parse",
            FailureStage::Publish => "publish",
        }
    }
}

/// Event emitted when a file is left unprocessed for the next cycle.
pub struct FileFailed {
    pub server_id: String,
    pub stage: FailureStage,
}

impl InternalEvent for FileFailed {
    fn emit(self) {
        trace!(server_id = %self.server_id, stage = self.stage.as_str(), "File failed");
        counter!(
            "killfeed_files_failed_total",
            "server_id" => self.server_id,
            "stage" => self.stage.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when CSV-looking files are ignored for their names.
pub struct InvalidFileNames {
    pub server_id: String,
    pub count: u64,
}

impl InternalEvent for InvalidFileNames {
    fn emit(self) {
        trace!(server_id = %self.server_id, count = self.count, "Invalid file names");
        counter!("killfeed_invalid_file_names_total", "server_id" => self.server_id)
            .increment(self.count);
    }
}

/// Event emitted when events are accepted by the sink.
pub struct EventsPublished {
    pub server_id: String,
    pub count: u64,
}

impl InternalEvent for EventsPublished {
    fn emit(self) {
        trace!(server_id = %self.server_id, count = self.count, "Events published");
        counter!("killfeed_events_published_total", "server_id" => self.server_id)
            .increment(self.count);
    }
}

/// Event emitted when the sink refuses events.
pub struct EventsRejected {
    pub server_id: String,
    pub count: u64,
}

impl InternalEvent for EventsRejected {
    fn emit(self) {
        trace!(server_id = %self.server_id, count = self.count, "Events rejected");
        counter!("killfeed_events_rejected_total", "server_id" => self.server_id)
            .increment(self.count);
    }
}

/// Event emitted when rows are dropped during parsing.
pub struct RowsSkipped {
    pub server_id: String,
    pub count: u64,
}

impl InternalEvent for RowsSkipped {
    fn emit(self) {
        trace!(server_id = %self.server_id, count = self.count, "Rows skipped");
        counter!("killfeed_rows_skipped_total", "server_id" => self.server_id)
            .increment(self.count);
    }
}

/// Event emitted for events published with a substituted timestamp.
pub struct DegradedEvents {
    pub server_id: String,
    pub count: u64,
}

impl InternalEvent for DegradedEvents {
    fn emit(self) {
        trace!(server_id = %self.server_id, count = self.count, "Degraded events");
        counter!("killfeed_degraded_events_total", "server_id" => self.server_id)
            .increment(self.count);
    }
}

// ============================================================================
// Histogram events for timing
// ============================================================================

/// Event emitted when a file has been parsed.
pub struct FileParseCompleted {
    pub duration: Duration,
}

impl InternalEvent for FileParseCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "File parse completed");
        histogram!("killfeed_file_parse_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Outcome of an ingestion cycle.
#[derive(Debug, Clone, Copy)]
pub enum CycleStatus {
    Success,
    Failed,
}

impl CycleStatus {
    fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Success => "success",
            CycleStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a cycle ends.
pub struct CycleCompleted {
    pub server_id: String,
    pub status: CycleStatus,
    pub duration: Duration,
}

impl InternalEvent for CycleCompleted {
    fn emit(self) {
        trace!(
            server_id = %self.server_id,
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Cycle completed"
        );
        counter!(
            "killfeed_cycles_total",
            "server_id" => self.server_id.clone(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!("killfeed_cycle_duration_seconds", "server_id" => self.server_id)
            .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Remote channel events
// ============================================================================

/// Status of a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Success,
    Timeout,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Timeout => "timeout",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a remote request completes.
pub struct RemoteRequest {
    pub operation: RemoteOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for RemoteRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Remote request"
        );
        counter!(
            "killfeed_remote_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "killfeed_remote_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Gauges
// ============================================================================

/// Event emitted when a source changes cycle state.
pub struct CycleStateChanged {
    pub server_id: String,
    pub state: u8,
}

impl InternalEvent for CycleStateChanged {
    fn emit(self) {
        gauge!("killfeed_cycle_state", "server_id" => self.server_id).set(self.state as f64);
    }
}

/// Event emitted after each cycle with how far the watermark trails now.
pub struct WatermarkLag {
    pub server_id: String,
    pub seconds: i64,
}

impl InternalEvent for WatermarkLag {
    fn emit(self) {
        trace!(server_id = %self.server_id, seconds = self.seconds, "Watermark lag");
        gauge!("killfeed_watermark_lag_seconds", "server_id" => self.server_id)
            .set(self.seconds as f64);
    }
}

/// Event emitted when a failed source is scheduled for retry.
pub struct BackoffScheduled {
    pub server_id: String,
    pub delay: Duration,
}

impl InternalEvent for BackoffScheduled {
    fn emit(self) {
        trace!(server_id = %self.server_id, delay_secs = self.delay.as_secs(), "Backoff scheduled");
        counter!("killfeed_backoff_total", "server_id" => self.server_id.clone()).increment(1);
        gauge!("killfeed_backoff_delay_seconds", "server_id" => self.server_id)
            .set(self.delay.as_secs_f64());
    }
}

/// Event emitted when the number of running source tasks changes.
pub struct ActiveSources {
    pub count: usize,
}

impl InternalEvent for ActiveSources {
    fn emit(self) {
        trace!(count = self.count, "Active sources");
        gauge!("killfeed_active_sources").set(self.count as f64);
    }
}
