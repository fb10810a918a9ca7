//! Compensating deletion of a rejected record.

use common::CorrelationKey;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::RecordStore;

/// What compensation found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompensationOutcome {
    /// The record existed and was deleted.
    Deleted,
    /// The record was already gone.
    AlreadyAbsent,
}

/// Undoes a local record creation when the remote decision is negative.
#[derive(Debug, Clone)]
pub struct CompensationExecutor<R> {
    records: R,
}

impl<R: RecordStore> CompensationExecutor<R> {
    /// Creates an executor over a record store.
    pub fn new(records: R) -> Self {
        Self { records }
    }

    /// Returns the underlying record store.
    pub fn records(&self) -> &R {
        &self.records
    }

    /// Deletes the record if it still exists.
    ///
    /// A failed lookup is returned as-is and may be retried. A failed
    /// deletion is a [`SagaError::CriticalInconsistency`].
    #[tracing::instrument(skip(self), fields(correlation_key = %key))]
    pub async fn compensate(&self, key: &CorrelationKey) -> Result<CompensationOutcome> {
        if self.records.get_by_id(key).await?.is_none() {
            tracing::warn!("record already missing, nothing to compensate");
            return Ok(CompensationOutcome::AlreadyAbsent);
        }

        match self.records.delete(key).await {
            Ok(true) => {
                tracing::info!("record deleted by compensation");
                Ok(CompensationOutcome::Deleted)
            }
            Ok(false) => {
                tracing::warn!("record vanished before compensation could delete it");
                Ok(CompensationOutcome::AlreadyAbsent)
            }
            Err(e) => Err(SagaError::CriticalInconsistency {
                correlation_key: key.clone(),
                reason: format!("compensating delete failed: {e}"),
            }),
        }
    }
}
