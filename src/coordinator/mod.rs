//! Per-source ingestion cycle.
//!
//! One [`IngestionCoordinator`] owns one source. A cycle connects, lists the
//! CSV root, and walks unprocessed files oldest first. For each file it
//! fetches the whole content, parses it on the blocking pool, publishes the
//! events, flushes the sink, and only then records the file in the watermark
//! and persists it.
//!
//! Failures are absorbed at the smallest scope that can absorb them: a bad row
//! is skipped by the parser, a rejected event is skipped here, a file that
//! cannot be fetched or parsed stays unprocessed for the next cycle. Only
//! connection and watermark failures end the cycle with an error.

pub mod backoff;
pub mod listing;
pub mod state;
pub mod stats;

pub use backoff::Backoff;
pub use listing::{CandidateFile, ListingScope};
pub use state::{CycleState, CycleStateMachine};
pub use stats::{ParserCoordinatorStats, SourceStatsSnapshot};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{SourceWatermark, WatermarkStoreRef};
use crate::emit;
use crate::error::{
    ConnectionSnafu, CycleError, LoadWatermarkSnafu, ParseTaskSnafu, SaveWatermarkSnafu,
};
use crate::event::CanonicalEvent;
use crate::metrics::events::{
    CycleCompleted, CycleStatus, DegradedEvents, EventsPublished, EventsRejected, FailureStage,
    FileFailed, FileParseCompleted, FileProcessed, InvalidFileNames, RowsSkipped, WatermarkLag,
};
use crate::parser::{self, ParseContext, ParsedFile};
use crate::remote::{RemoteSession, TimedChannel, TimedSession};
use crate::sink::EventSinkRef;

/// What one coordinator needs to know about its source.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub server_id: String,
    /// Remote directory holding the CSV drops.
    pub csv_dir: String,
    /// Map name when `csv_dir` already points at one map.
    pub map: Option<String>,
    /// Descend into per-map subdirectories of `csv_dir`.
    pub scan_maps: bool,
    /// How far back files are still considered.
    pub window: chrono::Duration,
    /// Wall-clock budget of one cycle, checked between files.
    pub max_cycle: Duration,
    /// Fixed delimiter, or `None` to detect per file.
    pub delimiter: Option<u8>,
}

/// Why a cycle stopped before exhausting its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    Deadline,
}

/// Outcome of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub candidates: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub events_published: usize,
    pub events_rejected: usize,
    pub rows_skipped: usize,
    pub degraded: usize,
    pub invalid_names: usize,
    pub stopped: Option<StopReason>,
}

/// Drives ingestion cycles for one source.
///
/// Cycles take `&mut self`, so a source never runs two cycles at once.
pub struct IngestionCoordinator {
    settings: CoordinatorSettings,
    channel: TimedChannel,
    store: WatermarkStoreRef,
    sink: EventSinkRef,
    stats: Arc<ParserCoordinatorStats>,
    state: CycleStateMachine,
    watermark: Option<SourceWatermark>,
    /// In-memory watermark is ahead of the persisted one.
    dirty: bool,
}

impl std::fmt::Debug for IngestionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionCoordinator")
            .field("server_id", &self.settings.server_id)
            .field("state", self.state.state())
            .finish()
    }
}

impl IngestionCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        channel: TimedChannel,
        store: WatermarkStoreRef,
        sink: EventSinkRef,
        stats: Arc<ParserCoordinatorStats>,
    ) -> Self {
        let state = CycleStateMachine::new(settings.server_id.clone());
        Self {
            settings,
            channel,
            store,
            sink,
            stats,
            state,
            watermark: None,
            dirty: false,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.settings.server_id
    }

    pub fn state(&self) -> &CycleState {
        self.state.state()
    }

    /// The watermark as of the last cycle, if one has run.
    pub fn watermark(&self) -> Option<&SourceWatermark> {
        self.watermark.as_ref()
    }

    /// Leave the failed state once the retry delay has passed.
    pub fn recover(&mut self) {
        if matches!(self.state.state(), CycleState::Failed(_)) {
            self.state.transition(CycleState::Idle);
        }
    }

    /// Run one full cycle.
    pub async fn run_cycle(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<CycleReport, CycleError> {
        let start = Instant::now();
        self.recover();
        self.state.transition(CycleState::Connecting);

        let result = self.connect_and_ingest(shutdown, start).await;
        let server_id = self.settings.server_id.clone();

        match &result {
            Ok(report) => {
                self.state.transition(CycleState::Idle);
                info!(
                    server_id = %server_id,
                    candidates = report.candidates,
                    files = report.files_processed,
                    failed = report.files_failed,
                    events = report.events_published,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Cycle complete"
                );
            }
            Err(e) => {
                self.state.fail(e.to_string());
                warn!(server_id = %server_id, error = %e, "Cycle failed");
            }
        }

        emit!(CycleCompleted {
            server_id: server_id.clone(),
            status: match &result {
                Ok(_) => CycleStatus::Success,
                Err(_) => CycleStatus::Failed,
            },
            duration: start.elapsed(),
        });
        if let Some(watermark) = &self.watermark {
            emit!(WatermarkLag {
                server_id,
                seconds: (Utc::now() - watermark.last_processed_timestamp).num_seconds(),
            });
        }

        result
    }

    async fn connect_and_ingest(
        &mut self,
        shutdown: &CancellationToken,
        start: Instant,
    ) -> Result<CycleReport, CycleError> {
        let mut session = self
            .channel
            .open_session()
            .await
            .context(ConnectionSnafu {
                server_id: &self.settings.server_id,
            })?;

        let mut watermark = match self.watermark.take() {
            Some(watermark) => watermark,
            None => self.load_watermark().await?,
        };
        let result = self
            .ingest(&mut session, &mut watermark, shutdown, start)
            .await;
        self.watermark = Some(watermark);

        if let Err(e) = session.close().await {
            debug!(server_id = %self.settings.server_id, error = %e, "Failed to close session");
        }
        result
    }

    async fn load_watermark(&mut self) -> Result<SourceWatermark, CycleError> {
        let server_id = &self.settings.server_id;
        let stored = self
            .store
            .load(server_id)
            .await
            .context(LoadWatermarkSnafu { server_id })?;

        Ok(match stored {
            Some(watermark) => {
                info!(
                    server_id = %server_id,
                    watermark = %watermark.last_processed_timestamp,
                    processed = watermark.processed_file_names.len(),
                    "Resuming from stored watermark"
                );
                watermark
            }
            None => {
                let watermark = SourceWatermark::initial(
                    server_id.clone(),
                    Utc::now(),
                    self.settings.window,
                );
                info!(
                    server_id = %server_id,
                    watermark = %watermark.last_processed_timestamp,
                    "No stored watermark, starting from polling window"
                );
                self.dirty = true;
                watermark
            }
        })
    }

    async fn ingest(
        &mut self,
        session: &mut TimedSession,
        watermark: &mut SourceWatermark,
        shutdown: &CancellationToken,
        start: Instant,
    ) -> Result<CycleReport, CycleError> {
        let server_id = self.settings.server_id.clone();
        let mut report = CycleReport::default();

        self.state.transition(CycleState::Listing);
        let cutoff = watermark.cutoff(Utc::now(), self.settings.window);
        let pruned = watermark.prune_before(cutoff);
        if pruned > 0 {
            debug!(server_id = %server_id, pruned, "Pruned processed file names");
            self.dirty = true;
        }

        let scope = ListingScope {
            server_id: &server_id,
            csv_dir: &self.settings.csv_dir,
            map: self.settings.map.as_deref(),
            scan_maps: self.settings.scan_maps,
        };
        let discovery = listing::discover(session, scope)
            .await
            .context(ConnectionSnafu {
                server_id: &server_id,
            })?;

        report.listed = discovery.files.len();
        report.invalid_names = discovery.invalid_names;
        if discovery.invalid_names > 0 {
            emit!(InvalidFileNames {
                server_id: server_id.clone(),
                count: discovery.invalid_names as u64,
            });
        }

        let candidates = listing::select_candidates(discovery.files, watermark, cutoff);
        report.candidates = candidates.len();
        if candidates.is_empty() {
            debug!(server_id = %server_id, listed = report.listed, "No new files");
        } else {
            info!(
                server_id = %server_id,
                candidates = candidates.len(),
                cutoff = %cutoff,
                "Found new files"
            );
        }

        // Earliest file of this cycle that failed; the watermark stays at or below it.
        let mut hold: Option<DateTime<Utc>> = None;

        for file in candidates {
            if shutdown.is_cancelled() {
                info!(server_id = %server_id, "Shutdown requested, stopping cycle");
                report.stopped = Some(StopReason::Cancelled);
                break;
            }
            if start.elapsed() >= self.settings.max_cycle {
                warn!(
                    server_id = %server_id,
                    max_cycle_secs = self.settings.max_cycle.as_secs(),
                    "Cycle deadline reached, remaining files wait for the next cycle"
                );
                report.stopped = Some(StopReason::Deadline);
                break;
            }

            self.state.transition(CycleState::Fetching);
            let bytes = match shutdown.run_until_cancelled(session.fetch(&file.path)).await {
                None => {
                    info!(server_id = %server_id, file = %file.name, "Shutdown requested during fetch");
                    report.stopped = Some(StopReason::Cancelled);
                    break;
                }
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    warn!(server_id = %server_id, file = %file.name, error = %e, "Failed to fetch file, will retry next cycle");
                    self.file_failed(&mut report, FailureStage::Fetch);
                    hold.get_or_insert(file.timestamp);
                    continue;
                }
            };

            self.state.transition(CycleState::Parsing);
            let parsed = match self.parse_file(&file, bytes).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(server_id = %server_id, file = %file.name, error = %e, "Failed to parse file, will retry next cycle");
                    self.file_failed(&mut report, FailureStage::Parse);
                    hold.get_or_insert(file.timestamp);
                    continue;
                }
            };
            report.rows_skipped += parsed.stats.skipped();
            report.degraded += parsed.stats.degraded;

            self.state.transition(CycleState::Publishing);
            let (published, rejected) = self.publish(&parsed.events).await;
            report.events_published += published;
            report.events_rejected += rejected;

            if let Err(e) = self.sink.flush(&server_id).await {
                warn!(server_id = %server_id, file = %file.name, error = %e, "Failed to flush sink, will retry next cycle");
                self.file_failed(&mut report, FailureStage::Publish);
                hold.get_or_insert(file.timestamp);
                continue;
            }

            watermark.mark_processed(file.name.clone(), file.timestamp, hold, Utc::now());
            self.stats
                .record_file(&server_id, published as u64, file.timestamp);
            report.files_processed += 1;
            emit!(FileProcessed {
                server_id: server_id.clone(),
            });
            self.record_parse_metrics(&parsed, published, rejected);

            debug!(
                server_id = %server_id,
                file = %file.name,
                rows = parsed.stats.rows,
                events = published,
                skipped = parsed.stats.skipped(),
                "Ingested file"
            );

            match self.store.save(watermark).await {
                Ok(()) => self.dirty = false,
                Err(e) => {
                    warn!(server_id = %server_id, file = %file.name, error = %e, "Failed to persist watermark, retrying at end of cycle");
                    self.dirty = true;
                }
            }
        }

        if self.dirty {
            self.store
                .save(watermark)
                .await
                .context(SaveWatermarkSnafu {
                    server_id: &server_id,
                })?;
            self.dirty = false;
        }

        Ok(report)
    }

    async fn parse_file(&self, file: &CandidateFile, bytes: Bytes) -> Result<ParsedFile, CycleError> {
        let server_id = self.settings.server_id.clone();
        let name = file.name.clone();
        let map = file.map.clone();
        let delimiter = self.settings.delimiter;
        let start = Instant::now();

        let parsed = tokio::task::spawn_blocking(move || {
            let ctx = ParseContext {
                server_id: &server_id,
                file: &name,
                map: map.as_deref(),
                now: Utc::now(),
            };
            parser::parse(&bytes, delimiter, &ctx)
        })
        .await
        .context(ParseTaskSnafu { file: &file.name })?;

        emit!(FileParseCompleted {
            duration: start.elapsed(),
        });
        Ok(parsed)
    }

    /// Publish in row order. Rejected events are logged and skipped.
    async fn publish(&self, events: &[CanonicalEvent]) -> (usize, usize) {
        let mut published = 0;
        let mut rejected = 0;
        for event in events {
            match self.sink.publish(event).await {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(
                        server_id = %self.settings.server_id,
                        event_id = %event.id,
                        error = %e,
                        "Sink rejected event, skipping"
                    );
                    rejected += 1;
                }
            }
        }
        (published, rejected)
    }

    fn file_failed(&self, report: &mut CycleReport, stage: FailureStage) {
        report.files_failed += 1;
        emit!(FileFailed {
            server_id: self.settings.server_id.clone(),
            stage,
        });
    }

    fn record_parse_metrics(&self, parsed: &ParsedFile, published: usize, rejected: usize) {
        let server_id = &self.settings.server_id;
        emit!(EventsPublished {
            server_id: server_id.clone(),
            count: published as u64,
        });
        if rejected > 0 {
            emit!(EventsRejected {
                server_id: server_id.clone(),
                count: rejected as u64,
            });
        }
        if parsed.stats.skipped() > 0 {
            emit!(RowsSkipped {
                server_id: server_id.clone(),
                count: parsed.stats.skipped() as u64,
            });
        }
        if parsed.stats.degraded > 0 {
            emit!(DegradedEvents {
                server_id: server_id.clone(),
                count: parsed.stats.degraded as u64,
            });
        }
    }
}
