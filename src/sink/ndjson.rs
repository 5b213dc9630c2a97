//! Append-only NDJSON output, one file per server.

use async_trait::async_trait;
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use super::EventSink;
use crate::error::{SinkError, SinkIoSnafu, SinkSerializeSnafu};
use crate::event::CanonicalEvent;
use crate::paths::file_stem;

/// Writes `{dir}/{server_id}.ndjson`.
///
/// Lines are buffered until [`EventSink::flush`], which the coordinator calls
/// once per ingested file.
#[derive(Debug)]
pub struct NdjsonFileSink {
    dir: PathBuf,
    writers: Mutex<HashMap<String, BufWriter<File>>>,
}

impl NdjsonFileSink {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.context(SinkIoSnafu {
            path: dir.display().to_string(),
        })?;
        Ok(Self {
            dir,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, server_id: &str) -> PathBuf {
        self.dir.join(format!("{}.ndjson", file_stem(server_id)))
    }

    async fn writer_for(path: &Path) -> Result<BufWriter<File>, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .context(SinkIoSnafu {
                path: path.display().to_string(),
            })?;
        Ok(BufWriter::new(file))
    }
}

#[async_trait]
impl EventSink for NdjsonFileSink {
    async fn publish(&self, event: &CanonicalEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event).context(SinkSerializeSnafu { id: &event.id })?;
        line.push(b'\n');

        let path = self.path_for(&event.server_id);
        let mut writers = self.writers.lock().await;
        if !writers.contains_key(&event.server_id) {
            let writer = Self::writer_for(&path).await?;
            writers.insert(event.server_id.clone(), writer);
        }
        if let Some(writer) = writers.get_mut(&event.server_id) {
            writer.write_all(&line).await.context(SinkIoSnafu {
                path: path.display().to_string(),
            })?;
        }
        Ok(())
    }

    async fn flush(&self, server_id: &str) -> Result<(), SinkError> {
        let mut writers = self.writers.lock().await;
        if let Some(writer) = writers.get_mut(server_id) {
            writer.flush().await.context(SinkIoSnafu {
                path: self.path_for(server_id).display().to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCategory;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn event(id: &str, server_id: &str) -> CanonicalEvent {
        CanonicalEvent {
            id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 5, 4, 0, 10, 0).unwrap(),
            killer_name: "A".to_string(),
            killer_id: "1".to_string(),
            victim_name: "B".to_string(),
            victim_id: "2".to_string(),
            weapon: "AK-74".to_string(),
            distance: 12.5,
            killer_platform: "PC".to_string(),
            victim_platform: "PC".to_string(),
            map: Some("world_0".to_string()),
            server_id: server_id.to_string(),
            category: EventCategory::Kill,
            degraded: false,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_appends_per_server_after_flush() {
        let temp = TempDir::new().unwrap();
        let sink = NdjsonFileSink::open(temp.path()).await.unwrap();

        sink.publish(&event("a", "7020")).await.unwrap();
        sink.publish(&event("b", "7020")).await.unwrap();
        sink.publish(&event("c", "other")).await.unwrap();
        sink.flush("7020").await.unwrap();
        sink.flush("other").await.unwrap();

        let content = std::fs::read_to_string(sink.path_for("7020")).unwrap();
        let lines: Vec<CanonicalEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], event("a", "7020"));
        assert_eq!(lines[1].id, "b");

        let other = std::fs::read_to_string(sink.path_for("other")).unwrap();
        assert!(other.contains("\"category\":\"kill\""));
    }

    #[tokio::test]
    async fn test_flush_is_scoped_to_one_server() {
        let temp = TempDir::new().unwrap();
        let sink = NdjsonFileSink::open(temp.path()).await.unwrap();

        sink.publish(&event("a", "7020")).await.unwrap();
        sink.publish(&event("b", "other")).await.unwrap();
        sink.flush("7020").await.unwrap();

        let flushed = std::fs::read_to_string(sink.path_for("7020")).unwrap();
        assert_eq!(flushed.lines().count(), 1);
        // Still buffered: another server's flush does not touch it.
        let pending = std::fs::read_to_string(sink.path_for("other")).unwrap();
        assert!(pending.is_empty());

        // A server that never published flushes trivially.
        sink.flush("idle").await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let temp = TempDir::new().unwrap();
        for id in ["a", "b"] {
            let sink = NdjsonFileSink::open(temp.path()).await.unwrap();
            sink.publish(&event(id, "7020")).await.unwrap();
            sink.flush("7020").await.unwrap();
        }
        let content = std::fs::read_to_string(temp.path().join("7020.ndjson")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
