//! Timeout wrappers for remote channels.
//!
//! Every network call of the wrapped backend runs under its own deadline. An
//! elapsed deadline becomes [`RemoteError::Timeout`], distinct from the
//! protocol errors the backend reports itself.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{RemoteConnector, RemoteEntry, RemoteFile, RemoteSession};
use crate::emit;
use crate::error::{RemoteError, RemoteOperation};
use crate::metrics::events::{RemoteRequest, RequestStatus};

/// Per-operation timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteTimeouts {
    #[serde(rename = "connect_timeout_secs", with = "secs")]
    pub connect: Duration,
    #[serde(rename = "list_timeout_secs", with = "secs")]
    pub list: Duration,
    #[serde(rename = "open_timeout_secs", with = "secs")]
    pub open: Duration,
    #[serde(rename = "read_timeout_secs", with = "secs")]
    pub read: Duration,
}

impl Default for RemoteTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            list: Duration::from_secs(5),
            open: Duration::from_secs(5),
            read: Duration::from_secs(30),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

async fn with_timeout<T, F>(
    operation: RemoteOperation,
    target: &str,
    timeout: Duration,
    fut: F,
) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout {
            operation,
            target: target.to_string(),
            timeout,
        }),
    };

    let status = match &result {
        Ok(_) => RequestStatus::Success,
        Err(e) if e.is_timeout() => RequestStatus::Timeout,
        Err(_) => RequestStatus::Error,
    };
    emit!(RemoteRequest {
        operation,
        status,
        duration: start.elapsed(),
    });
    result
}

/// Connector wrapper applying [`RemoteTimeouts`].
#[derive(Debug, Clone)]
pub struct TimedChannel {
    inner: Arc<dyn RemoteConnector>,
    timeouts: RemoteTimeouts,
}

impl TimedChannel {
    pub fn new(inner: Arc<dyn RemoteConnector>, timeouts: RemoteTimeouts) -> Self {
        Self { inner, timeouts }
    }

    pub fn timeouts(&self) -> RemoteTimeouts {
        self.timeouts
    }

    /// Connect and return the concrete timed session.
    pub async fn open_session(&self) -> Result<TimedSession, RemoteError> {
        let target = self.inner.target();
        let inner = with_timeout(
            RemoteOperation::Connect,
            target,
            self.timeouts.connect,
            self.inner.connect(),
        )
        .await?;
        Ok(TimedSession {
            inner,
            timeouts: self.timeouts,
            target: target.to_string(),
        })
    }
}

#[async_trait]
impl RemoteConnector for TimedChannel {
    fn target(&self) -> &str {
        self.inner.target()
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        Ok(Box::new(self.open_session().await?))
    }
}

/// Session wrapper applying [`RemoteTimeouts`].
pub struct TimedSession {
    inner: Box<dyn RemoteSession>,
    timeouts: RemoteTimeouts,
    target: String,
}

impl std::fmt::Debug for TimedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimedSession<{}>", self.target)
    }
}

impl TimedSession {
    /// Open and read a whole file, each step under its own deadline.
    pub async fn fetch(&mut self, path: &str) -> Result<Bytes, RemoteError> {
        let mut file = self.open(path).await?;
        file.read_all().await
    }
}

#[async_trait]
impl RemoteSession for TimedSession {
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        with_timeout(
            RemoteOperation::List,
            path,
            self.timeouts.list,
            self.inner.list_dir(path),
        )
        .await
    }

    async fn open(&mut self, path: &str) -> Result<Box<dyn RemoteFile>, RemoteError> {
        let inner = with_timeout(
            RemoteOperation::Open,
            path,
            self.timeouts.open,
            self.inner.open(path),
        )
        .await?;
        Ok(Box::new(TimedFile {
            inner,
            timeout: self.timeouts.read,
            path: path.to_string(),
        }))
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        with_timeout(
            RemoteOperation::Close,
            &self.target,
            self.timeouts.connect,
            self.inner.close(),
        )
        .await
    }
}

struct TimedFile {
    inner: Box<dyn RemoteFile>,
    timeout: Duration,
    path: String,
}

#[async_trait]
impl RemoteFile for TimedFile {
    async fn read_all(&mut self) -> Result<Bytes, RemoteError> {
        with_timeout(
            RemoteOperation::Read,
            &self.path,
            self.timeout,
            self.inner.read_all(),
        )
        .await
    }
}
