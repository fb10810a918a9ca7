//! Idempotent consumer of completion events.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use domain::{
    Clock, CompletionNotified, ProgressAggregate, ProgressChange, QuestDefinition, SystemClock,
};
use store::{AggregateStore, ClaimOutcome, EventLedger, Repository};

use crate::catalog::QuestCatalog;
use crate::error::{ConsumerError, Result};

/// Progress added to each matching quest per completion event.
pub const PROGRESS_PER_EVENT: u32 = 1;

/// How the consumer decides whether an event was already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdempotencyMode {
    /// Check the ledger, apply, then record. Concurrent duplicates can both
    /// pass the check.
    CheckThenRecord,
    /// Claim the event atomically before applying it, commit afterwards.
    #[default]
    AtomicClaim,
}

impl IdempotencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyMode::CheckThenRecord => "check-then-record",
            IdempotencyMode::AtomicClaim => "atomic",
        }
    }
}

impl std::fmt::Display for IdempotencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdempotencyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atomic" | "atomic-claim" => Ok(IdempotencyMode::AtomicClaim),
            "check-then-record" | "check" => Ok(IdempotencyMode::CheckThenRecord),
            other => Err(format!("unknown idempotency mode: {other}")),
        }
    }
}

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub mode: IdempotencyMode,
    /// How long a claim blocks other workers before it counts as abandoned.
    pub claim_lease: Duration,
    /// Attempts at writing one aggregate under contention.
    pub max_write_attempts: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            mode: IdempotencyMode::default(),
            claim_lease: Duration::seconds(300),
            max_write_attempts: 5,
        }
    }
}

/// Result of handling one completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The event passed the idempotency gate; `updated` aggregates changed.
    Applied { updated: usize },
    /// The event was already applied or is being applied elsewhere.
    Duplicate,
}

/// Applies completion events to quest progress exactly once per event id.
pub struct CompletionConsumer<L, S, C> {
    ledger: L,
    progress: Repository<S, ProgressAggregate>,
    catalog: C,
    config: ConsumerConfig,
    clock: Arc<dyn Clock>,
}

impl<L, S, C> CompletionConsumer<L, S, C>
where
    L: EventLedger,
    S: AggregateStore,
    C: QuestCatalog,
{
    pub fn new(ledger: L, store: S, catalog: C) -> Self {
        Self {
            ledger,
            progress: Repository::new(store),
            catalog,
            config: ConsumerConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn mode(&self) -> IdempotencyMode {
        self.config.mode
    }

    /// Applies the event unless its id was already applied.
    ///
    /// On error nothing is recorded in the ledger, so a redelivery retries
    /// the event. Aggregates updated before the failure are not counted twice.
    /// An event claimed by another delivery fails with the transient
    /// [`ConsumerError::InFlight`] until that claim is committed or expires.
    #[tracing::instrument(
        skip(self, event),
        fields(
            event_id = %event.event_id,
            subject_id = %event.subject_id,
            mode = %self.config.mode,
        )
    )]
    pub async fn handle(&self, event: CompletionNotified) -> Result<ConsumeOutcome> {
        match self.config.mode {
            IdempotencyMode::CheckThenRecord => self.check_then_record(&event).await,
            IdempotencyMode::AtomicClaim => self.claim_and_commit(&event).await,
        }
    }

    async fn check_then_record(&self, event: &CompletionNotified) -> Result<ConsumeOutcome> {
        if self.ledger.exists(event.event_id).await? {
            return Ok(self.duplicate());
        }

        let updated = self.apply(event).await?;
        self.ledger.insert(event.event_id, self.clock.now()).await?;
        Ok(self.applied(updated))
    }

    async fn claim_and_commit(&self, event: &CompletionNotified) -> Result<ConsumeOutcome> {
        let claimed_at = self.clock.now();
        let claim = self
            .ledger
            .try_claim(event.event_id, claimed_at, self.config.claim_lease)
            .await?;

        match claim {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyProcessed => return Ok(self.duplicate()),
            ClaimOutcome::InFlight => {
                // The holder may still fail or die; only the ledger record settles it.
                metrics::counter!("progress_events_in_flight_total").increment(1);
                tracing::debug!("event is being applied by another delivery");
                return Err(ConsumerError::InFlight(event.event_id));
            }
        }

        match self.apply(event).await {
            Ok(updated) => {
                self.ledger.commit(event.event_id, self.clock.now()).await?;
                Ok(self.applied(updated))
            }
            Err(e) => {
                if let Err(release_err) = self.ledger.release(event.event_id, claimed_at).await {
                    tracing::warn!(
                        error = %release_err,
                        "could not release claim, it will expire with its lease"
                    );
                }
                Err(e)
            }
        }
    }

    /// Updates every aggregate the event counts towards. Returns how many changed.
    async fn apply(&self, event: &CompletionNotified) -> Result<usize> {
        let quests = self
            .catalog
            .list_active(&event.category, event.occurred_at)
            .await?;

        if quests.is_empty() {
            tracing::debug!(category = %event.category, "no active quest counts this event");
        }

        let mut updated = 0;
        for quest in &quests {
            if self.apply_to_quest(event, quest).await? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn apply_to_quest(
        &self,
        event: &CompletionNotified,
        quest: &QuestDefinition,
    ) -> Result<bool> {
        let key = ProgressAggregate::key_for(event.subject_id, quest.id);

        for attempt in 1..=self.config.max_write_attempts {
            let now = self.clock.now();
            let mut aggregate = match self.progress.load(&key).await? {
                Some(aggregate) => aggregate,
                None => ProgressAggregate::new(event.subject_id, quest.id, now),
            };

            let change =
                aggregate.apply_event(event.event_id, PROGRESS_PER_EVENT, quest.target_count, now);
            if !change.is_modified() {
                tracing::debug!(quest = %quest.code, ?change, "progress left unchanged");
                return Ok(false);
            }

            match self.progress.save(&mut aggregate).await {
                Ok(()) => {
                    metrics::counter!("progress_aggregates_updated_total").increment(1);
                    if let ProgressChange::Completed { progress_count } = change {
                        tracing::info!(
                            quest = %quest.code,
                            progress_count,
                            reward = %quest.reward,
                            "quest completed"
                        );
                    }
                    return Ok(true);
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(
                        quest = %quest.code,
                        attempt,
                        "progress changed concurrently, reloading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ConsumerError::ContentionExhausted {
            subject_id: event.subject_id,
            quest_id: quest.id,
        })
    }

    fn applied(&self, updated: usize) -> ConsumeOutcome {
        metrics::counter!("progress_events_applied_total").increment(1);
        tracing::info!(updated, "completion event applied");
        ConsumeOutcome::Applied { updated }
    }

    fn duplicate(&self) -> ConsumeOutcome {
        metrics::counter!("progress_events_duplicate_total").increment(1);
        tracing::info!("event already processed, skipping");
        ConsumeOutcome::Duplicate
    }
}
