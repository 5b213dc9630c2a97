//! Local filesystem backend.
//!
//! Serves a mirrored copy of a server's remote tree. Remote paths are resolved
//! relative to the configured root directory.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;

use super::{RemoteConnector, RemoteEntry, RemoteFile, RemoteSession};
use crate::error::{ConnectSnafu, ListSnafu, OpenSnafu, ReadSnafu, RemoteError};

/// Connector for a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
    target: String,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let target = format!("file://{}", root.display());
        Self { root, target }
    }
}

#[async_trait]
impl RemoteConnector for LocalConnector {
    fn target(&self) -> &str {
        &self.target
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(Box::new(LocalSession {
                root: self.root.clone(),
                closed: false,
            })),
            Ok(_) => ConnectSnafu {
                target: self.target.clone(),
                message: "not a directory",
            }
            .fail(),
            Err(e) => ConnectSnafu {
                target: self.target.clone(),
                message: e.to_string(),
            }
            .fail(),
        }
    }
}

/// Session over a local root. Holds no OS resources between calls.
#[derive(Debug)]
pub struct LocalSession {
    root: PathBuf,
    closed: bool,
}

impl LocalSession {
    /// Map a remote path onto the local root, ignoring `..` components.
    fn resolve(&self, path: &str) -> PathBuf {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            if let Component::Normal(part) = component {
                resolved.push(part);
            }
        }
        resolved
    }

    fn ensure_open(&self, path: &str) -> Result<(), RemoteError> {
        ensure!(
            !self.closed,
            OpenSnafu {
                path,
                message: "session closed",
            }
        );
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        ensure!(
            !self.closed,
            ListSnafu {
                path,
                message: "session closed",
            }
        );

        let dir = self.resolve(path);
        let list_error = |e: std::io::Error| RemoteError::List {
            path: path.to_string(),
            message: e.to_string(),
        };

        let mut reader = tokio::fs::read_dir(&dir).await.map_err(list_error)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(list_error)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata().await.map_err(list_error)?;
            entries.push(RemoteEntry {
                path: crate::paths::join(path, &name),
                name,
                is_dir: meta.is_dir(),
                size: meta.is_file().then_some(meta.len()),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&mut self, path: &str) -> Result<Box<dyn RemoteFile>, RemoteError> {
        self.ensure_open(path)?;
        let file = tokio::fs::File::open(self.resolve(path))
            .await
            .map_err(|e| RemoteError::Open {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(Box::new(LocalFile {
            file,
            path: path.to_string(),
        }))
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.closed = true;
        Ok(())
    }
}

struct LocalFile {
    file: tokio::fs::File,
    path: String,
}

#[async_trait]
impl RemoteFile for LocalFile {
    async fn read_all(&mut self) -> Result<Bytes, RemoteError> {
        let mut buf = Vec::new();
        self.file
            .read_to_end(&mut buf)
            .await
            .context(ReadSnafu { path: &self.path })?;
        Ok(Bytes::from(buf))
    }
}
