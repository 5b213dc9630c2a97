//! End-to-end ingestion cycles against a local mirror of a server's file tree.
//!
//! Run with: cargo test --test ingestion_tests

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use killfeed::checkpoint::{JsonWatermarkStore, MemoryWatermarkStore, WatermarkStore, WatermarkStoreRef};
use killfeed::coordinator::{
    CoordinatorSettings, CycleState, IngestionCoordinator, ParserCoordinatorStats,
};
use killfeed::error::{CycleError, RemoteError};
use killfeed::event::{CanonicalEvent, EventCategory};
use killfeed::remote::{
    LocalConnector, RemoteConnector, RemoteConnectorRef, RemoteEntry, RemoteFile, RemoteSession,
    RemoteTimeouts, TimedChannel,
};
use killfeed::sink::{ChannelSink, EventSinkRef, NdjsonFileSink};

const SERVER: &str = "7020";

fn write_csv(root: &Path, name: &str, content: &str) {
    let path = root.join("deathlogs").join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        server_id: SERVER.to_string(),
        csv_dir: "/deathlogs".to_string(),
        map: None,
        scan_maps: true,
        // Fixture files are dated 2025; keep them inside the window.
        window: chrono::Duration::days(10_000),
        max_cycle: Duration::from_secs(300),
        delimiter: None,
    }
}

fn coordinator(
    connector: RemoteConnectorRef,
    store: WatermarkStoreRef,
    sink: EventSinkRef,
) -> IngestionCoordinator {
    IngestionCoordinator::new(
        settings(),
        TimedChannel::new(connector, RemoteTimeouts::default()),
        store,
        sink,
        Arc::new(ParserCoordinatorStats::new()),
    )
}

fn drain(rx: &mut mpsc::Receiver<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_new_files_are_picked_up_on_later_cycles() {
    let temp = TempDir::new().unwrap();
    write_csv(
        temp.path(),
        "2025.05.04-00.00.00.csv",
        "2025.05.04-00.05.00;Alice;1;Bob;2;AK-74;120;PC;PC\n",
    );

    let store = Arc::new(MemoryWatermarkStore::new());
    let (sink, mut rx) = ChannelSink::bounded(64);
    let mut coordinator = coordinator(
        Arc::new(LocalConnector::new(temp.path())),
        store.clone(),
        Arc::new(sink),
    );
    let shutdown = CancellationToken::new();

    coordinator.run_cycle(&shutdown).await.unwrap();
    assert_eq!(drain(&mut rx).len(), 1);

    write_csv(
        temp.path(),
        "2025.05.04-02.00.00.csv",
        "2025.05.04-02.01.00;Bob;2;Alice;1;SVD;300;PC;Xbox\n\
         2025.05.04-02.02.00;Carol;3;Carol;3;suicide_by_relocation;0;PS;PS\n",
    );

    let report = coordinator.run_cycle(&shutdown).await.unwrap();
    assert_eq!(report.files_processed, 1);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].category, EventCategory::Kill);
    assert_eq!(events[0].victim_platform, "Xbox");
    assert!(events[1].is_suicide());
    assert!(events.iter().all(|e| e.server_id == SERVER));
}

#[tokio::test]
async fn test_watermark_never_moves_backwards() {
    let temp = TempDir::new().unwrap();
    write_csv(
        temp.path(),
        "2025.05.04-06.00.00.csv",
        "2025.05.04-06.01.00;A;1;B;2;AK-74;5;PC;PC\n",
    );

    let store = Arc::new(MemoryWatermarkStore::new());
    let (sink, mut rx) = ChannelSink::bounded(64);
    let mut coordinator = coordinator(
        Arc::new(LocalConnector::new(temp.path())),
        store.clone(),
        Arc::new(sink),
    );
    let shutdown = CancellationToken::new();

    coordinator.run_cycle(&shutdown).await.unwrap();
    let first = store.get(SERVER).unwrap().last_processed_timestamp;

    // Older than the watermark: never a candidate.
    write_csv(
        temp.path(),
        "2025.05.04-03.00.00.csv",
        "2025.05.04-03.01.00;C;3;D;4;AK-74;5;PC;PC\n",
    );
    let report = coordinator.run_cycle(&shutdown).await.unwrap();
    assert_eq!(report.candidates, 0);

    let second = store.get(SERVER).unwrap().last_processed_timestamp;
    assert_eq!(first, second);
    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_badly_named_files_are_skipped() {
    let temp = TempDir::new().unwrap();
    write_csv(temp.path(), "latest.csv", "2025.05.04-00.05.00;A;1;B;2;AK-74;5;PC;PC\n");
    write_csv(temp.path(), "notes.txt", "not a log");
    write_csv(
        temp.path(),
        "2025.05.04-00.00.00.csv",
        "2025.05.04-00.05.00;A;1;B;2;AK-74;5;PC;PC\n",
    );

    let store = Arc::new(MemoryWatermarkStore::new());
    let (sink, mut rx) = ChannelSink::bounded(64);
    let mut coordinator = coordinator(
        Arc::new(LocalConnector::new(temp.path())),
        store,
        Arc::new(sink),
    );

    let report = coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.invalid_names, 1);
    assert_eq!(report.files_processed, 1);
    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_map_directories_tag_events() {
    let temp = TempDir::new().unwrap();
    write_csv(
        temp.path(),
        "world_1/2025.05.04-00.00.00.csv",
        "2025.05.04-00.05.00;A;1;B;2;AK-74;5;PC;PC\n",
    );

    let store = Arc::new(MemoryWatermarkStore::new());
    let (sink, mut rx) = ChannelSink::bounded(64);
    let mut coordinator = coordinator(
        Arc::new(LocalConnector::new(temp.path())),
        store.clone(),
        Arc::new(sink),
    );

    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].map.as_deref(), Some("world_1"));
    assert!(
        store
            .get(SERVER)
            .unwrap()
            .is_processed("world_1/2025.05.04-00.00.00.csv")
    );
}

/// Local connector whose first attempt to open `fail_path` errors out.
#[derive(Debug)]
struct FlakyConnector {
    inner: LocalConnector,
    fail_path: String,
    failed: Arc<AtomicBool>,
}

struct FlakySession {
    inner: Box<dyn RemoteSession>,
    fail_path: String,
    failed: Arc<AtomicBool>,
}

#[async_trait]
impl RemoteConnector for FlakyConnector {
    fn target(&self) -> &str {
        self.inner.target()
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        Ok(Box::new(FlakySession {
            inner: self.inner.connect().await?,
            fail_path: self.fail_path.clone(),
            failed: self.failed.clone(),
        }))
    }
}

#[async_trait]
impl RemoteSession for FlakySession {
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.inner.list_dir(path).await
    }

    async fn open(&mut self, path: &str) -> Result<Box<dyn RemoteFile>, RemoteError> {
        if path == self.fail_path && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(RemoteError::Open {
                path: path.to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.inner.open(path).await
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_fetch_failure_is_retried_next_cycle() {
    let temp = TempDir::new().unwrap();
    write_csv(
        temp.path(),
        "2025.05.04-00.00.00.csv",
        "2025.05.04-00.05.00;A;1;B;2;AK-74;5;PC;PC\n",
    );

    let connector = Arc::new(FlakyConnector {
        inner: LocalConnector::new(temp.path()),
        fail_path: "/deathlogs/2025.05.04-00.00.00.csv".to_string(),
        failed: Arc::new(AtomicBool::new(false)),
    });
    let store = Arc::new(MemoryWatermarkStore::new());
    let (sink, mut rx) = ChannelSink::bounded(64);
    let mut coordinator = coordinator(connector, store.clone(), Arc::new(sink));
    let shutdown = CancellationToken::new();

    let report = coordinator.run_cycle(&shutdown).await.unwrap();
    assert_eq!(report.files_failed, 1);
    assert_eq!(coordinator.state(), &CycleState::Idle);
    assert!(drain(&mut rx).is_empty());

    let report = coordinator.run_cycle(&shutdown).await.unwrap();
    assert_eq!(report.files_processed, 1);
    assert_eq!(drain(&mut rx).len(), 1);
    assert!(store.get(SERVER).unwrap().is_processed("2025.05.04-00.00.00.csv"));
}

#[tokio::test]
async fn test_failed_earlier_file_is_retried_after_later_success() {
    use chrono::{TimeZone, Utc};

    let temp = TempDir::new().unwrap();
    write_csv(
        temp.path(),
        "2025.05.04-00.00.00.csv",
        "2025.05.04-00.05.00;A;1;B;2;AK-74;5;PC;PC\n",
    );
    write_csv(
        temp.path(),
        "2025.05.04-01.00.00.csv",
        "2025.05.04-01.05.00;C;3;D;4;SVD;50;PC;PC\n",
    );

    let connector = Arc::new(FlakyConnector {
        inner: LocalConnector::new(temp.path()),
        fail_path: "/deathlogs/2025.05.04-00.00.00.csv".to_string(),
        failed: Arc::new(AtomicBool::new(false)),
    });
    let store = Arc::new(MemoryWatermarkStore::new());
    let (sink, mut rx) = ChannelSink::bounded(64);
    let mut coordinator = coordinator(connector, store.clone(), Arc::new(sink));
    let shutdown = CancellationToken::new();

    let report = coordinator.run_cycle(&shutdown).await.unwrap();
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.files_processed, 1);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].killer_name, "C");

    // The later success must not push the watermark past the failed file.
    let watermark = store.get(SERVER).unwrap();
    assert_eq!(
        watermark.last_processed_timestamp,
        Utc.with_ymd_and_hms(2025, 5, 4, 0, 0, 0).unwrap()
    );
    assert!(!watermark.is_processed("2025.05.04-00.00.00.csv"));

    let report = coordinator.run_cycle(&shutdown).await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.files_processed, 1);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].killer_name, "A");

    let watermark = store.get(SERVER).unwrap();
    assert!(watermark.is_processed("2025.05.04-00.00.00.csv"));
    assert!(watermark.is_processed("2025.05.04-01.00.00.csv"));

    let report = coordinator.run_cycle(&shutdown).await.unwrap();
    assert_eq!(report.candidates, 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_unreachable_source_fails_cycle() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("gone");

    let store = Arc::new(MemoryWatermarkStore::new());
    let (sink, _rx) = ChannelSink::bounded(1);
    let mut coordinator = coordinator(
        Arc::new(LocalConnector::new(missing)),
        store.clone(),
        Arc::new(sink),
    );

    let err = coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CycleError::Connection { .. }));
    assert!(matches!(coordinator.state(), CycleState::Failed(_)));
    assert!(store.load(SERVER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_restart_with_persisted_state_publishes_nothing_twice() {
    let temp = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    write_csv(
        temp.path(),
        "2025.05.04-00.00.00.csv",
        "2025.05.04-00.05.00;A;1;B;2;AK-74;5;PC;PC\n\
         2025.05.04-00.06.00;B;2;A;1;AK-74;7;PC;PC\n",
    );

    {
        let store = Arc::new(JsonWatermarkStore::open(state_dir.path()).await.unwrap());
        let (sink, mut rx) = ChannelSink::bounded(64);
        let mut first = coordinator(
            Arc::new(LocalConnector::new(temp.path())),
            store,
            Arc::new(sink),
        );
        first.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(drain(&mut rx).len(), 2);
    }

    // A fresh process sees the same files and the persisted watermark.
    let store = Arc::new(JsonWatermarkStore::open(state_dir.path()).await.unwrap());
    let (sink, mut rx) = ChannelSink::bounded(64);
    let mut second = coordinator(
        Arc::new(LocalConnector::new(temp.path())),
        store.clone(),
        Arc::new(sink),
    );
    let report = second.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.candidates, 0);
    assert!(drain(&mut rx).is_empty());
    let watermark = store.load(SERVER).await.unwrap().unwrap();
    assert!(watermark.is_processed("2025.05.04-00.00.00.csv"));
}

#[tokio::test]
async fn test_ndjson_sink_receives_every_event_once() {
    let temp = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_csv(
        temp.path(),
        "2025.05.04-00.00.00.csv",
        "2025.05.04-00.05.00;A;1;B;2;AK-74;5;PC;PC\n\
         2025.05.04-00.06.00;B;2;A;1;SKS;7;PC;PC\n",
    );

    let sink = Arc::new(NdjsonFileSink::open(out.path()).await.unwrap());
    let mut coordinator = coordinator(
        Arc::new(LocalConnector::new(temp.path())),
        Arc::new(MemoryWatermarkStore::new()),
        sink.clone(),
    );
    let shutdown = CancellationToken::new();
    coordinator.run_cycle(&shutdown).await.unwrap();
    coordinator.run_cycle(&shutdown).await.unwrap();

    let content = std::fs::read_to_string(sink.path_for(SERVER)).unwrap();
    let events: Vec<CanonicalEvent> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].weapon, "AK-74");
    assert_eq!(events[1].weapon, "SKS");
    assert_ne!(events[0].id, events[1].id);
}
