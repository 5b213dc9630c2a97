use async_trait::async_trait;
use std::sync::Arc;

use super::{EventSink, EventSinkRef};
use crate::error::SinkError;
use crate::event::CanonicalEvent;
use crate::stats::PlayerStatsAggregator;

/// Feeds player statistics from every event the inner sink accepts.
#[derive(Debug)]
pub struct PlayerStatsSink {
    inner: EventSinkRef,
    stats: Arc<PlayerStatsAggregator>,
}

impl PlayerStatsSink {
    pub fn new(inner: EventSinkRef, stats: Arc<PlayerStatsAggregator>) -> Self {
        Self { inner, stats }
    }
}

#[async_trait]
impl EventSink for PlayerStatsSink {
    async fn publish(&self, event: &CanonicalEvent) -> Result<(), SinkError> {
        self.inner.publish(event).await?;
        self.stats.record(event);
        Ok(())
    }

    async fn flush(&self, server_id: &str) -> Result<(), SinkError> {
        self.inner.flush(server_id).await
    }
}
