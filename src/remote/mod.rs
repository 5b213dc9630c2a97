//! Remote file channel.
//!
//! A [`RemoteConnector`] opens a stateful [`RemoteSession`] that can list
//! directories and open files. Backends:
//! - `sftp`: SSH file transfer, driven from a dedicated worker thread
//! - `local`: a mirrored directory tree on the local filesystem
//!
//! [`timed`] wraps any backend with per-operation timeouts. Sessions close when
//! dropped; [`RemoteSession::close`] only makes the close explicit.

pub mod local;
pub mod sftp;
pub mod timed;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::error::RemoteError;

pub use local::LocalConnector;
pub use sftp::{SftpConnector, SftpCredentials};
pub use timed::{RemoteTimeouts, TimedChannel, TimedSession};

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// File name without directory.
    pub name: String,
    /// Full remote path.
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_dir: false,
            size: None,
            modified: None,
        }
    }

    pub fn dir(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            is_dir: true,
            ..Self::file(name, path)
        }
    }
}

/// Opens sessions against one remote source.
#[async_trait]
pub trait RemoteConnector: Send + Sync + fmt::Debug {
    /// Human-readable target, used in logs and errors.
    fn target(&self) -> &str;

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// A live connection.
#[async_trait]
pub trait RemoteSession: Send {
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    async fn open(&mut self, path: &str) -> Result<Box<dyn RemoteFile>, RemoteError>;

    /// Close the connection. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<(), RemoteError>;
}

/// A file opened for reading.
#[async_trait]
pub trait RemoteFile: Send {
    async fn read_all(&mut self) -> Result<Bytes, RemoteError>;
}

/// A reference-counted connector.
pub type RemoteConnectorRef = Arc<dyn RemoteConnector>;

/// Last path component of a `/`-separated remote path.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
