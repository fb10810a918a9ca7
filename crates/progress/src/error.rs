//! Progress consumer error types.

use common::{EventId, QuestId, SubjectId};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur while applying completion events.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The ledger or the aggregate store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The quest catalog could not be read.
    #[error("Quest catalog error: {0}")]
    Catalog(String),

    /// Another delivery holds a live claim on the event. Its outcome is not
    /// known yet, so the event must be delivered again.
    #[error("Event {0} is being applied by another delivery")]
    InFlight(EventId),

    /// Concurrent writers kept winning the race for one aggregate.
    #[error("Gave up updating progress of {subject_id} on quest {quest_id} after repeated conflicts")]
    ContentionExhausted {
        subject_id: SubjectId,
        quest_id: QuestId,
    },
}

impl ConsumerError {
    /// Returns true if redelivering the event may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ConsumerError::Store(e) => e.is_transient(),
            ConsumerError::InFlight(_)
            | ConsumerError::Catalog(_)
            | ConsumerError::ContentionExhausted { .. } => true,
        }
    }
}

/// Result type for consumer operations.
pub type Result<T> = std::result::Result<T, ConsumerError>;
