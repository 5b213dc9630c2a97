//! Metrics and observability infrastructure.
//!
//! This module groups all observability-related components:
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus HTTP server plus health and statistics endpoints

pub mod events;
pub mod server;

pub use server::{ObservabilityState, init};

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding Prometheus metric.
///
/// # Example
///
/// ```ignore
/// use killfeed::metrics::events::EventsPublished;
///
/// emit!(EventsPublished { server_id: "7020".to_string(), count: 12 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
