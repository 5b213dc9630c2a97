//! Cycle state machine of one source.

use tracing::{trace, warn};

use crate::emit;
use crate::metrics::events::CycleStateChanged;

/// Where a source currently is in its ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Connecting,
    Listing,
    Fetching,
    Parsing,
    Publishing,
    Failed(String),
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Connecting => "connecting",
            CycleState::Listing => "listing",
            CycleState::Fetching => "fetching",
            CycleState::Parsing => "parsing",
            CycleState::Publishing => "publishing",
            CycleState::Failed(_) => "failed",
        }
    }

    /// Numeric code exported as a gauge.
    pub fn code(&self) -> u8 {
        match self {
            CycleState::Idle => 0,
            CycleState::Connecting => 1,
            CycleState::Listing => 2,
            CycleState::Fetching => 3,
            CycleState::Parsing => 4,
            CycleState::Publishing => 5,
            CycleState::Failed(_) => 6,
        }
    }

    /// Whether `self -> next` is a legal step.
    ///
    /// Per file the cycle goes Fetching, Parsing, Publishing; a file that fails
    /// to fetch or parse goes straight on to the next Fetching. Any state may
    /// fail, and Failed only recovers to Idle.
    pub fn can_transition(&self, next: &CycleState) -> bool {
        use CycleState::*;
        matches!(
            (self, next),
            (_, Failed(_))
                | (Failed(_), Idle)
                | (Idle, Connecting)
                | (Connecting, Listing)
                | (Listing, Fetching | Idle)
                | (Fetching, Parsing | Fetching | Idle)
                | (Parsing, Publishing | Fetching | Idle)
                | (Publishing, Fetching | Idle)
        )
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleState::Failed(reason) => write!(f, "failed({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Tracks and reports the state of one source.
#[derive(Debug)]
pub struct CycleStateMachine {
    server_id: String,
    state: CycleState,
}

impl CycleStateMachine {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn transition(&mut self, next: CycleState) {
        if !self.state.can_transition(&next) {
            warn!(
                server_id = %self.server_id,
                from = %self.state,
                to = %next,
                "Unexpected cycle state transition"
            );
            debug_assert!(false, "illegal transition {} -> {}", self.state, next);
        }
        trace!(server_id = %self.server_id, from = %self.state, to = %next, "Cycle state");
        emit!(CycleStateChanged {
            server_id: self.server_id.clone(),
            state: next.code(),
        });
        self.state = next;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.transition(CycleState::Failed(reason.into()));
    }
}
