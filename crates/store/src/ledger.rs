use chrono::{DateTime, Utc};
use common::EventId;
use serde::{Deserialize, Serialize};

/// Proof that an event's effect has been applied.
///
/// At most one record exists per event id. Records are written once and
/// never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEventRecord {
    pub event_id: EventId,
    pub processed_at: DateTime<Utc>,
}

/// Result of trying to reserve an event id for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller holds the claim and must either commit or release it.
    Claimed,
    /// A processed record already exists for the event.
    AlreadyProcessed,
    /// Another worker holds a live claim on the event.
    InFlight,
}

impl ClaimOutcome {
    /// Returns true if the caller now owns the event.
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}
