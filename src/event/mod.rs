//! Canonical kill-feed events.
//!
//! Every row that survives parsing becomes a [`CanonicalEvent`]: an immutable,
//! category-tagged record with a deterministic id. Field-name aliasing lives in
//! [`normalize`], the suicide and category cascade in [`category`].

pub mod category;
pub mod filter;
pub mod normalize;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use category::{Classification, categorize, is_suicide};
pub use filter::EventFilter;
pub use normalize::{RawRecord, normalize};

/// Placeholder for optional text fields a row did not carry.
pub const UNKNOWN: &str = "Unknown";

/// Event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Kill,
    Suicide,
    Death,
    Unknown,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Kill => "kill",
            EventCategory::Suicide => "suicide",
            EventCategory::Death => "death",
            EventCategory::Unknown => "unknown",
        }
    }

    /// Parse an explicit category value, case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "kill" => Some(EventCategory::Kill),
            "suicide" => Some(EventCategory::Suicide),
            "death" => Some(EventCategory::Death),
            "unknown" => Some(EventCategory::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized kill, suicide or death occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub killer_name: String,
    pub killer_id: String,
    pub victim_name: String,
    pub victim_id: String,
    pub weapon: String,
    pub distance: f64,
    pub killer_platform: String,
    pub victim_platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    pub server_id: String,
    pub category: EventCategory,
    /// The row timestamp was unparseable and replaced with processing time.
    #[serde(default)]
    pub degraded: bool,
    /// Source fields with no canonical counterpart.
    #[serde(flatten)]
    pub extra: IndexMap<String, String>,
}

impl CanonicalEvent {
    /// Whether the event carries the fields downstream consumers require.
    pub fn is_publishable(&self) -> bool {
        !self.victim_name.trim().is_empty()
    }

    pub fn is_suicide(&self) -> bool {
        self.category == EventCategory::Suicide
    }
}

/// Build the deterministic event id from its raw components.
pub fn event_id(timestamp: &str, killer_name: &str, victim_name: &str, weapon: &str) -> String {
    format!("{timestamp}:{killer_name}:{victim_name}:{weapon}")
}
