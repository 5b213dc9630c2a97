use async_trait::async_trait;
use tracing::info;

use super::EventSink;
use crate::error::SinkError;
use crate::event::CanonicalEvent;

/// Writes every event as a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, event: &CanonicalEvent) -> Result<(), SinkError> {
        info!(
            server_id = %event.server_id,
            id = %event.id,
            category = %event.category,
            timestamp = %event.timestamp,
            killer = %event.killer_name,
            victim = %event.victim_name,
            weapon = %event.weapon,
            distance = event.distance,
            degraded = event.degraded,
            "Event"
        );
        Ok(())
    }
}
