//! Downstream delivery of canonical events.
//!
//! The coordinator publishes each event individually and flushes once per
//! file, before the file is marked processed. Implementations:
//! - `ndjson`: one append-only NDJSON file per server
//! - `log`: structured log lines, for dry runs and debugging
//! - `channel`: an in-process mpsc channel
//! - `players`: decorator feeding player statistics

pub mod channel;
pub mod log;
pub mod ndjson;
pub mod players;

pub use channel::ChannelSink;
pub use log::LogSink;
pub use ndjson::NdjsonFileSink;
pub use players::PlayerStatsSink;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SinkError;
use crate::event::CanonicalEvent;

/// Receiver of canonical events.
#[async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Deliver one event. A failure affects only this event.
    async fn publish(&self, event: &CanonicalEvent) -> Result<(), SinkError>;

    /// Make everything published so far for `server_id` durable.
    ///
    /// Scoped to one source so a failing destination never holds back others.
    async fn flush(&self, _server_id: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A reference-counted event sink.
pub type EventSinkRef = Arc<dyn EventSink>;
