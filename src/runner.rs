//! Source orchestration.
//!
//! Every configured source runs as its own task with a jittered start. A task
//! repeats ingestion cycles until shutdown: after a good cycle it waits the
//! poll interval (plus jitter), after a connection-level failure it waits the
//! backoff delay. Sources never wait on each other.

use rand::Rng;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{Backoff, IngestionCoordinator};
use crate::emit;
use crate::error::CycleError;
use crate::metrics::events::{ActiveSources, BackoffScheduled};

/// Generate a random jitter duration up to the specified maximum seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}

/// Scheduling knobs shared by every source.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub interval: Duration,
    pub jitter_secs: u64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Run a single cycle and stop.
    pub once: bool,
}

/// The polling loop of one source.
#[derive(Debug)]
pub struct SourceTask {
    coordinator: IngestionCoordinator,
    backoff: Backoff,
    schedule: Schedule,
    shutdown: CancellationToken,
}

impl SourceTask {
    pub fn new(
        coordinator: IngestionCoordinator,
        schedule: Schedule,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            backoff: Backoff::new(schedule.initial_backoff, schedule.max_backoff),
            schedule,
            shutdown,
        }
    }

    pub fn server_id(&self) -> &str {
        self.coordinator.server_id()
    }

    /// Poll until shutdown. In `once` mode the single cycle's error is returned.
    pub async fn run(mut self) -> Result<(), CycleError> {
        loop {
            let result = self.coordinator.run_cycle(&self.shutdown).await;
            if self.shutdown.is_cancelled() {
                break;
            }

            let delay = match result {
                Ok(_) => {
                    self.backoff.reset();
                    if self.schedule.once {
                        return Ok(());
                    }
                    let delay = self.schedule.interval + random_jitter(self.schedule.jitter_secs);
                    debug!(
                        server_id = self.server_id(),
                        "Waiting {}s before next poll",
                        delay.as_secs()
                    );
                    delay
                }
                Err(e) if self.schedule.once => return Err(e),
                Err(e) => {
                    let delay = self.backoff.next_delay(e.kind());
                    warn!(
                        server_id = self.server_id(),
                        failures = self.backoff.failures(),
                        delay_secs = delay.as_secs(),
                        "Retrying source after backoff"
                    );
                    emit!(BackoffScheduled {
                        server_id: self.server_id().to_string(),
                        delay,
                    });
                    delay
                }
            };

            if self
                .shutdown
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                info!(server_id = self.server_id(), "Shutdown requested during poll wait");
                break;
            }
            self.coordinator.recover();
        }
        Ok(())
    }
}

/// How the source tasks ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub panicked: usize,
}

/// Runs every source task concurrently with shared shutdown handling.
#[derive(Debug)]
pub struct SourceRunner {
    tasks: Vec<SourceTask>,
    shutdown: CancellationToken,
    start_jitter_secs: u64,
}

impl SourceRunner {
    pub fn new(tasks: Vec<SourceTask>, shutdown: CancellationToken, start_jitter_secs: u64) -> Self {
        Self {
            tasks,
            shutdown,
            start_jitter_secs,
        }
    }

    /// Spawn the shutdown signal handler.
    pub fn spawn_shutdown_handler(&self) {
        crate::signal::spawn_shutdown_handler(self.shutdown.clone());
    }

    /// Run all sources to completion.
    pub async fn run(self) -> RunSummary {
        let mut handles: JoinSet<(String, Result<(), CycleError>)> = JoinSet::new();

        for task in self.tasks {
            let shutdown = self.shutdown.clone();
            let server_id = task.server_id().to_string();
            let start_jitter = random_jitter(self.start_jitter_secs);

            handles.spawn(async move {
                // Stagger start times, but respect shutdown signal
                if !start_jitter.is_zero() {
                    info!(
                        server_id = %server_id,
                        jitter_secs = start_jitter.as_secs(),
                        "Delaying source start for jitter"
                    );
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(start_jitter))
                        .await
                        .is_none()
                    {
                        info!(server_id = %server_id, "Shutdown requested during jitter delay");
                        return (server_id, Ok(()));
                    }
                }

                let result = task.run().await;
                (server_id, result)
            });
        }

        info!("Spawned {} source tasks", handles.len());
        emit!(ActiveSources {
            count: handles.len()
        });

        let mut summary = RunSummary::default();
        while let Some(result) = handles.join_next().await {
            match result {
                Ok((server_id, Ok(()))) => {
                    info!(server_id = %server_id, "Source stopped");
                    summary.completed += 1;
                }
                Ok((server_id, Err(e))) => {
                    error!(server_id = %server_id, error = %e, "Source failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Source task panicked");
                    summary.panicked += 1;
                }
            }
            emit!(ActiveSources {
                count: handles.len()
            });
        }

        info!("All sources stopped");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryWatermarkStore;
    use crate::coordinator::{CoordinatorSettings, ParserCoordinatorStats};
    use crate::error::RemoteError;
    use crate::remote::{RemoteConnector, RemoteSession, RemoteTimeouts, TimedChannel};
    use crate::sink::LogSink;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Refuses every connection and cancels shutdown after `limit` attempts.
    #[derive(Debug)]
    struct RefusingConnector {
        attempts: AtomicUsize,
        limit: usize,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl RemoteConnector for RefusingConnector {
        fn target(&self) -> &str {
            "refused:22"
        }

        async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.shutdown.cancel();
            }
            Err(RemoteError::Connect {
                target: "refused:22".to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn schedule(once: bool) -> Schedule {
        Schedule {
            interval: Duration::from_secs(60),
            jitter_secs: 0,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(20),
            once,
        }
    }

    fn task(connector: Arc<RefusingConnector>, once: bool) -> SourceTask {
        let coordinator = IngestionCoordinator::new(
            CoordinatorSettings {
                server_id: "7020".to_string(),
                csv_dir: "/deathlogs".to_string(),
                map: None,
                scan_maps: true,
                window: chrono::Duration::days(60),
                max_cycle: Duration::from_secs(120),
                delimiter: None,
            },
            TimedChannel::new(connector.clone(), RemoteTimeouts::default()),
            Arc::new(MemoryWatermarkStore::new()),
            Arc::new(LogSink),
            Arc::new(ParserCoordinatorStats::new()),
        );
        SourceTask::new(coordinator, schedule(once), connector.shutdown.clone())
    }

    #[test]
    fn test_random_jitter_bounds() {
        assert_eq!(random_jitter(0), Duration::ZERO);
        for _ in 0..100 {
            assert!(random_jitter(3) < Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_source_backs_off_until_shutdown() {
        let connector = Arc::new(RefusingConnector {
            attempts: AtomicUsize::new(0),
            limit: 3,
            shutdown: CancellationToken::new(),
        });
        let start = tokio::time::Instant::now();

        task(connector.clone(), false).run().await.unwrap();

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        // Protocol failures start at 1s * 2^4, then hit the 20s cap.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(16 + 20));
        assert!(elapsed < Duration::from_secs(37));
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_mode_returns_cycle_error() {
        let connector = Arc::new(RefusingConnector {
            attempts: AtomicUsize::new(0),
            limit: usize::MAX,
            shutdown: CancellationToken::new(),
        });

        let err = task(connector.clone(), true).run().await.unwrap_err();
        assert!(matches!(err, CycleError::Connection { .. }));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_collects_results() {
        let connector = Arc::new(RefusingConnector {
            attempts: AtomicUsize::new(0),
            limit: usize::MAX,
            shutdown: CancellationToken::new(),
        });
        let runner = SourceRunner::new(
            vec![task(connector.clone(), true), task(connector.clone(), true)],
            connector.shutdown.clone(),
            0,
        );

        let summary = runner.run().await;
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.completed, 0);
    }
}
