//! Persisted saga instance.

use chrono::{DateTime, Utc};
use common::CorrelationKey;
use serde::{Deserialize, Serialize};
use store::{Document, Version};

use crate::compensation::CompensationOutcome;
use crate::state::SagaState;

/// One character-creation saga, keyed by the created record's id.
///
/// Stored so that a restarted worker keeps waiting for the decision and so
/// that the outcome stays auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    correlation_key: CorrelationKey,
    state: SagaState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// User owning the record, kept for log filtering.
    owner_id: Option<String>,
    /// Message sent along with a confirmation.
    confirmation_message: Option<String>,
    /// Reason for failure, if any.
    failure_reason: Option<String>,
    /// What compensation did, if it ran.
    compensation: Option<CompensationOutcome>,
    #[serde(skip)]
    version: Version,
}

impl SagaInstance {
    /// Opens a saga awaiting a decision.
    pub fn initiate(
        correlation_key: CorrelationKey,
        owner_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_key,
            state: SagaState::Initiated,
            created_at: now,
            updated_at: now,
            owner_id,
            confirmation_message: None,
            failure_reason: None,
            compensation: None,
            version: Version::initial(),
        }
    }

    /// Moves the saga to Completed. Returns false if it was not Initiated.
    pub fn complete(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.state.can_complete() {
            return false;
        }
        self.state = SagaState::Completed;
        self.confirmation_message = Some(message.into());
        self.updated_at = now;
        true
    }

    /// Moves the saga to Failed after compensation. Returns false if it was not Initiated.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        compensation: CompensationOutcome,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.state.can_fail() {
            return false;
        }
        self.state = SagaState::Failed;
        self.failure_reason = Some(reason.into());
        self.compensation = Some(compensation);
        self.updated_at = now;
        true
    }
}

// Query methods
impl SagaInstance {
    /// Returns the correlation key.
    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.correlation_key
    }

    /// Returns the saga state.
    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn confirmation_message(&self) -> Option<&str> {
        self.confirmation_message.as_deref()
    }

    /// Returns the failure reason, if failed.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn compensation(&self) -> Option<CompensationOutcome> {
        self.compensation
    }
}

impl Document for SagaInstance {
    const COLLECTION: &'static str = "saga_instances";

    fn key(&self) -> String {
        self.correlation_key.to_string()
    }

    fn tag(&self) -> Option<String> {
        Some(self.state.as_str().to_string())
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}
