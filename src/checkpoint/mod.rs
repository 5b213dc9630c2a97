//! Watermark checkpointing.
//!
//! Each source persists a [`SourceWatermark`] after every fully published
//! file, so a crash loses at most the file that was in flight. Dedup across
//! restarts depends entirely on this state.

pub mod state;
pub mod store;

pub use state::SourceWatermark;
pub use store::{JsonWatermarkStore, MemoryWatermarkStore};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::StoreError;

/// Persistence for per-source watermarks.
#[async_trait]
pub trait WatermarkStore: Send + Sync + std::fmt::Debug {
    /// Load the stored watermark, or `None` for a never-seen source.
    async fn load(&self, server_id: &str) -> Result<Option<SourceWatermark>, StoreError>;

    /// Durably replace the stored watermark.
    async fn save(&self, watermark: &SourceWatermark) -> Result<(), StoreError>;
}

/// A reference-counted watermark store.
pub type WatermarkStoreRef = Arc<dyn WatermarkStore>;
