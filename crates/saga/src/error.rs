//! Saga error types.

use common::CorrelationKey;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Saga instances or parked decisions could not be read or written.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The created-record store could not be reached.
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Local and remote state diverged and no automatic path restores them.
    #[error("Critical inconsistency for {correlation_key}: {reason}")]
    CriticalInconsistency {
        correlation_key: CorrelationKey,
        reason: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if redelivering the message may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Store(e) => e.is_transient(),
            SagaError::RecordStore(_) => true,
            SagaError::CriticalInconsistency { .. } | SagaError::Serialization(_) => false,
        }
    }

    /// Returns true if the error needs operator attention.
    pub fn is_critical(&self) -> bool {
        matches!(self, SagaError::CriticalInconsistency { .. })
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
