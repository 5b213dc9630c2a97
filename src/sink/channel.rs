use async_trait::async_trait;
use tokio::sync::mpsc;

use super::EventSink;
use crate::error::SinkError;
use crate::event::CanonicalEvent;

/// Forwards events to an in-process consumer.
///
/// Publishing waits for channel capacity, so a slow consumer applies
/// backpressure to ingestion.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CanonicalEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<CanonicalEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<CanonicalEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: &CanonicalEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| SinkError::SinkClosed)
    }
}
