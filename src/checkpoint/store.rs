//! Watermark persistence backends.

use async_trait::async_trait;
use dashmap::DashMap;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{SourceWatermark, WatermarkStore};
use crate::error::{StoreError, StoreIoSnafu, StoreJsonSnafu};
use crate::paths::file_stem;

/// One JSON document per source under a state directory.
///
/// Writes go to a temporary file that is renamed over the previous state, so a
/// crash mid-write leaves the last complete watermark in place.
#[derive(Debug, Clone)]
pub struct JsonWatermarkStore {
    dir: PathBuf,
}

impl JsonWatermarkStore {
    /// Open a store, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.context(StoreIoSnafu {
            path: dir.display().to_string(),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, server_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(server_id)))
    }
}


#[async_trait]
impl WatermarkStore for JsonWatermarkStore {
    async fn load(&self, server_id: &str) -> Result<Option<SourceWatermark>, StoreError> {
        let path = self.path_for(server_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(StoreIoSnafu {
                    path: path.display().to_string(),
                });
            }
        };
        let watermark = serde_json::from_slice(&bytes).context(StoreJsonSnafu { server_id })?;
        Ok(Some(watermark))
    }

    async fn save(&self, watermark: &SourceWatermark) -> Result<(), StoreError> {
        let path = self.path_for(&watermark.server_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(watermark).context(StoreJsonSnafu {
            server_id: &watermark.server_id,
        })?;

        tokio::fs::write(&tmp, &json).await.context(StoreIoSnafu {
            path: tmp.display().to_string(),
        })?;
        tokio::fs::rename(&tmp, &path).await.context(StoreIoSnafu {
            path: path.display().to_string(),
        })?;

        debug!(
            server_id = %watermark.server_id,
            watermark = %watermark.last_processed_timestamp,
            files = watermark.processed_file_names.len(),
            "Saved watermark"
        );
        Ok(())
    }
}

/// In-process store. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    entries: DashMap<String, SourceWatermark>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, server_id: &str) -> Option<SourceWatermark> {
        self.entries.get(server_id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self, server_id: &str) -> Result<Option<SourceWatermark>, StoreError> {
        Ok(self.get(server_id))
    }

    async fn save(&self, watermark: &SourceWatermark) -> Result<(), StoreError> {
        self.entries
            .insert(watermark.server_id.clone(), watermark.clone());
        Ok(())
    }
}
