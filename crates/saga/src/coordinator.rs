//! Saga coordinator for character creation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::CorrelationKey;
use domain::{Clock, EntityConfirmed, EntityCreated, EntityRejected, SystemClock};
use store::{AggregateStore, DocumentQuery, Repository};

use crate::alert::{Inconsistency, InconsistencyReporter, LoggingReporter};
use crate::character_creation::{MAX_WRITE_ATTEMPTS, SAGA_TYPE, TIMEOUT_REASON};
use crate::compensation::{CompensationExecutor, CompensationOutcome};
use crate::correlation::CorrelationLocks;
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::parked::{Decision, ParkedDecision};
use crate::services::RecordStore;
use crate::state::SagaState;

/// Result of handling one saga message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    /// A new saga instance now awaits its decision.
    Opened,
    /// The record was confirmed.
    Completed,
    /// The record was rejected and compensated.
    Failed(CompensationOutcome),
    /// The message repeated or arrived after a terminal decision.
    Duplicate,
    /// The decision arrived before its saga and was stored for later.
    Parked,
}

impl SagaOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaOutcome::Opened => "opened",
            SagaOutcome::Completed => "completed",
            SagaOutcome::Failed(_) => "failed",
            SagaOutcome::Duplicate => "duplicate",
            SagaOutcome::Parked => "parked",
        }
    }
}

/// What the reconciler did with one parked decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkedResolution {
    /// Its saga exists after all; the decision was applied.
    Replayed(SagaOutcome),
    /// No saga showed up before the cutoff; the decision was dropped.
    Expired,
    /// Still waiting for its saga.
    Kept,
}

/// What to do with a rejection whose saga does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WhenMissing {
    Park,
    Ignore,
}

/// Keeps a locally created record consistent with the remote decision on it.
///
/// Each saga is keyed by the record's id. Handlers for one key run one at a
/// time in this process; across processes the instance version decides which
/// writer wins.
pub struct SagaCoordinator<S, R> {
    instances: Repository<S, SagaInstance>,
    parked: Repository<S, ParkedDecision>,
    compensation: CompensationExecutor<R>,
    locks: CorrelationLocks,
    reporter: Arc<dyn InconsistencyReporter>,
    clock: Arc<dyn Clock>,
}

impl<S, R> SagaCoordinator<S, R>
where
    S: AggregateStore + Clone,
    R: RecordStore,
{
    /// Creates a coordinator that logs inconsistencies and uses the system clock.
    pub fn new(store: S, records: R) -> Self {
        Self {
            instances: Repository::new(store.clone()),
            parked: Repository::new(store),
            compensation: CompensationExecutor::new(records),
            locks: CorrelationLocks::new(),
            reporter: Arc::new(LoggingReporter),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the inconsistency reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn InconsistencyReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Returns the record store compensation runs against.
    pub fn records(&self) -> &R {
        self.compensation.records()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Opens the saga for a newly created record.
    ///
    /// A decision parked for the same key is applied right away.
    #[tracing::instrument(
        skip(self, event),
        fields(saga_type = SAGA_TYPE, correlation_key = %event.subject_id, owner_id = ?event.owner_id)
    )]
    pub async fn handle_created(&self, event: EntityCreated) -> Result<SagaOutcome> {
        let key = event.subject_id;
        let _guard = self.locks.acquire(&key).await;

        let mut instance = SagaInstance::initiate(key.clone(), event.owner_id, self.now());
        let opened = match self.instances.save(&mut instance).await {
            Ok(()) => {
                metrics::counter!("saga_opened_total").increment(1);
                tracing::info!("saga initiated, awaiting decision");
                true
            }
            Err(e) if e.is_conflict() => false,
            Err(e) => return Err(e.into()),
        };

        if let Some(parked) = self.parked.load(key.as_str()).await? {
            return self.replay(parked).await;
        }

        if opened {
            Ok(SagaOutcome::Opened)
        } else {
            Ok(self.duplicate("saga already exists"))
        }
    }

    /// Applies a confirmation: Initiated → Completed.
    #[tracing::instrument(skip(self, event), fields(correlation_key = %event.subject_id))]
    pub async fn handle_confirmed(&self, event: EntityConfirmed) -> Result<SagaOutcome> {
        let _guard = self.locks.acquire(&event.subject_id).await;
        self.confirm_locked(&event.subject_id, event.message).await
    }

    /// Applies a rejection: compensates, then Initiated → Failed.
    #[tracing::instrument(skip(self, event), fields(correlation_key = %event.subject_id))]
    pub async fn handle_rejected(&self, event: EntityRejected) -> Result<SagaOutcome> {
        let _guard = self.locks.acquire(&event.subject_id).await;
        self.fail_locked(&event.subject_id, event.reason, WhenMissing::Park)
            .await
    }

    /// Fails a saga that waited too long, compensating its record.
    ///
    /// A decision parked for the saga is applied instead.
    #[tracing::instrument(skip(self))]
    pub async fn time_out(&self, key: &CorrelationKey) -> Result<SagaOutcome> {
        let _guard = self.locks.acquire(key).await;
        if let Some(parked) = self.parked.load(key.as_str()).await? {
            tracing::warn!("saga timing out with a parked decision, applying it");
            return self.replay(parked).await;
        }
        self.fail_locked(key, TIMEOUT_REASON.to_string(), WhenMissing::Ignore)
            .await
    }

    /// Loads a saga instance by correlation key.
    pub async fn get_saga(&self, key: &CorrelationKey) -> Result<Option<SagaInstance>> {
        Ok(self.instances.load(key.as_str()).await?)
    }

    /// Returns sagas still waiting for a decision that were opened before `cutoff`.
    pub async fn pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<SagaInstance>> {
        let query = DocumentQuery::new()
            .tag(SagaState::Initiated.as_str())
            .updated_before(cutoff);
        Ok(self.instances.query(query).await?)
    }

    /// Returns every parked decision.
    pub async fn parked_decisions(&self) -> Result<Vec<ParkedDecision>> {
        Ok(self.parked.query(DocumentQuery::new()).await?)
    }

    /// Settles the decision parked for `key`.
    ///
    /// A creation handled elsewhere can open the saga just after a decision
    /// was parked and miss it. If the saga exists the decision is applied.
    /// Otherwise it is dropped once parked before `cutoff`.
    #[tracing::instrument(skip(self))]
    pub async fn settle_parked(
        &self,
        key: &CorrelationKey,
        cutoff: DateTime<Utc>,
    ) -> Result<ParkedResolution> {
        let _guard = self.locks.acquire(key).await;

        let Some(parked) = self.parked.load(key.as_str()).await? else {
            return Ok(ParkedResolution::Kept);
        };

        if self.instances.load(key.as_str()).await?.is_some() {
            tracing::warn!(
                parked_at = %parked.parked_at(),
                "parked decision found beside its saga, applying it"
            );
            let outcome = self.replay(parked).await?;
            return Ok(ParkedResolution::Replayed(outcome));
        }

        if parked.parked_at() >= cutoff {
            return Ok(ParkedResolution::Kept);
        }

        if self.parked.delete(&parked).await? {
            tracing::warn!(
                parked_at = %parked.parked_at(),
                "parked decision expired without a matching saga"
            );
            return Ok(ParkedResolution::Expired);
        }
        Ok(ParkedResolution::Kept)
    }

    async fn replay(&self, parked: ParkedDecision) -> Result<SagaOutcome> {
        let key = parked.correlation_key().clone();
        tracing::info!(parked_at = %parked.parked_at(), "replaying parked decision");

        let outcome = match parked.decision() {
            Decision::Confirmed { message } => self.confirm_locked(&key, message.clone()).await?,
            Decision::Rejected { reason } => {
                self.fail_locked(&key, reason.clone(), WhenMissing::Park)
                    .await?
            }
        };

        self.parked.delete(&parked).await?;
        Ok(outcome)
    }

    async fn confirm_locked(&self, key: &CorrelationKey, message: String) -> Result<SagaOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let Some(mut instance) = self.instances.load(key.as_str()).await? else {
                return self.park(key, Decision::Confirmed { message }).await;
            };

            if !instance.complete(message.clone(), self.now()) {
                return Ok(self.duplicate(instance.state().as_str()));
            }

            match self.instances.save(&mut instance).await {
                Ok(()) => {
                    metrics::counter!("saga_completed_total").increment(1);
                    tracing::info!(owner_id = ?instance.owner_id(), "saga completed");
                    return Ok(SagaOutcome::Completed);
                }
                Err(e) if e.is_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(attempt, "saga changed concurrently, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn fail_locked(
        &self,
        key: &CorrelationKey,
        reason: String,
        when_missing: WhenMissing,
    ) -> Result<SagaOutcome> {
        let mut compensated: Option<CompensationOutcome> = None;
        let mut attempt = 0;
        loop {
            attempt += 1;

            let Some(mut instance) = self.instances.load(key.as_str()).await? else {
                return match when_missing {
                    WhenMissing::Park => self.park(key, Decision::Rejected { reason }).await,
                    WhenMissing::Ignore => Ok(self.duplicate("saga no longer exists")),
                };
            };

            if instance.state().is_terminal() {
                if compensated.is_some() && instance.state() == SagaState::Completed {
                    return Err(self.raise_critical(
                        key,
                        "record was compensated but the saga completed concurrently",
                    ));
                }
                return Ok(self.duplicate(instance.state().as_str()));
            }

            let outcome = match compensated {
                Some(outcome) => outcome,
                None => {
                    let outcome = match self.compensation.compensate(key).await {
                        Ok(outcome) => outcome,
                        Err(SagaError::CriticalInconsistency { reason, .. }) => {
                            return Err(self.raise_critical(key, reason));
                        }
                        Err(e) => return Err(e),
                    };
                    compensated = Some(outcome);
                    outcome
                }
            };

            instance.fail(reason.clone(), outcome, self.now());
            match self.instances.save(&mut instance).await {
                Ok(()) => {
                    metrics::counter!("saga_failed_total").increment(1);
                    tracing::warn!(
                        owner_id = ?instance.owner_id(),
                        reason = %reason,
                        compensation = ?outcome,
                        "saga rollback triggered"
                    );
                    return Ok(SagaOutcome::Failed(outcome));
                }
                Err(e) if e.is_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(attempt, "saga changed concurrently, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn park(&self, key: &CorrelationKey, decision: Decision) -> Result<SagaOutcome> {
        let mut parked = ParkedDecision::new(key.clone(), decision, self.now());
        match self.parked.save(&mut parked).await {
            Ok(()) => {
                metrics::counter!("saga_parked_total").increment(1);
                tracing::info!("decision arrived before its saga, parked");
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!("a decision is already parked for this key");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(SagaOutcome::Parked)
    }

    fn duplicate(&self, seen: &str) -> SagaOutcome {
        metrics::counter!("saga_duplicates_total").increment(1);
        tracing::debug!(seen, "duplicate or late saga message ignored");
        SagaOutcome::Duplicate
    }

    fn raise_critical(&self, key: &CorrelationKey, reason: impl Into<String>) -> SagaError {
        let inconsistency = Inconsistency {
            correlation_key: key.clone(),
            reason: reason.into(),
            detected_at: self.now(),
        };

        metrics::counter!("saga_critical_inconsistencies_total").increment(1);
        tracing::error!(
            severity = "critical",
            correlation_key = %inconsistency.correlation_key,
            reason = %inconsistency.reason,
            "critical compensation failure, manual repair required"
        );
        self.reporter.report(&inconsistency);

        SagaError::CriticalInconsistency {
            correlation_key: inconsistency.correlation_key,
            reason: inconsistency.reason,
        }
    }
}
