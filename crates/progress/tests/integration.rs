//! Integration tests for the completion consumer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{EventId, QuestId, SubjectId};
use domain::{CompletionNotified, ProgressAggregate, QuestDefinition, QuestStatus, QuestType};
use progress::{
    CompletionConsumer, ConsumeOutcome, ConsumerConfig, ConsumerError, IdempotencyMode,
    InMemoryQuestCatalog, ProgressQueries,
};
use store::{
    ClaimOutcome, EventLedger, InMemoryAggregateStore, InMemoryEventLedger, ProcessedEventRecord,
    Repository,
};
use tokio::sync::Barrier;

/// Ledger that holds every caller at the idempotency gate until both
/// deliveries of a duplicate pair have passed it.
#[derive(Clone)]
struct GatedLedger {
    inner: InMemoryEventLedger,
    gate: Arc<Barrier>,
}

impl GatedLedger {
    fn new(inner: InMemoryEventLedger) -> Self {
        Self {
            inner,
            gate: Arc::new(Barrier::new(2)),
        }
    }
}

#[async_trait]
impl EventLedger for GatedLedger {
    async fn exists(&self, event_id: EventId) -> store::Result<bool> {
        let exists = self.inner.exists(event_id).await?;
        self.gate.wait().await;
        Ok(exists)
    }

    async fn get(&self, event_id: EventId) -> store::Result<Option<ProcessedEventRecord>> {
        self.inner.get(event_id).await
    }

    async fn insert(&self, event_id: EventId, processed_at: DateTime<Utc>) -> store::Result<bool> {
        self.inner.insert(event_id, processed_at).await
    }

    async fn try_claim(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> store::Result<ClaimOutcome> {
        let outcome = self.inner.try_claim(event_id, now, lease).await?;
        self.gate.wait().await;
        Ok(outcome)
    }

    async fn commit(&self, event_id: EventId, processed_at: DateTime<Utc>) -> store::Result<()> {
        self.inner.commit(event_id, processed_at).await
    }

    async fn release(&self, event_id: EventId, claimed_at: DateTime<Utc>) -> store::Result<()> {
        self.inner.release(event_id, claimed_at).await
    }
}

struct TestHarness<L> {
    consumer: Arc<CompletionConsumer<L, InMemoryAggregateStore, InMemoryQuestCatalog>>,
    store: InMemoryAggregateStore,
    ledger: InMemoryEventLedger,
    catalog: InMemoryQuestCatalog,
}

impl TestHarness<InMemoryEventLedger> {
    fn new(mode: IdempotencyMode) -> Self {
        let ledger = InMemoryEventLedger::new();
        Self::build(ledger.clone(), ledger, mode)
    }
}

impl TestHarness<GatedLedger> {
    fn gated(mode: IdempotencyMode) -> Self {
        let ledger = InMemoryEventLedger::new();
        Self::build(GatedLedger::new(ledger.clone()), ledger, mode)
    }
}

impl<L: EventLedger> TestHarness<L> {
    fn build(gate: L, ledger: InMemoryEventLedger, mode: IdempotencyMode) -> Self {
        let store = InMemoryAggregateStore::new();
        let catalog = InMemoryQuestCatalog::new();
        let consumer = CompletionConsumer::new(gate, store.clone(), catalog.clone()).with_config(
            ConsumerConfig {
                mode,
                ..Default::default()
            },
        );
        Self {
            consumer: Arc::new(consumer),
            store,
            ledger,
            catalog,
        }
    }

    async fn add_quest(&self, code: &str, target_count: u32) -> QuestId {
        let quest = QuestDefinition::new(code, QuestType::dungeon_completion(), target_count);
        let id = quest.id;
        self.catalog.upsert(quest).await;
        id
    }

    async fn progress(&self, subject: SubjectId, quest: QuestId) -> Option<ProgressAggregate> {
        Repository::<_, ProgressAggregate>::new(self.store.clone())
            .load(&ProgressAggregate::key_for(subject, quest))
            .await
            .unwrap()
    }
}

fn completion(subject: SubjectId) -> CompletionNotified {
    CompletionNotified::dungeon_completed(subject, Utc::now())
}

#[tokio::test]
async fn test_redelivered_event_increments_each_quest_once() {
    for mode in [IdempotencyMode::AtomicClaim, IdempotencyMode::CheckThenRecord] {
        let h = TestHarness::new(mode);
        let three = h.add_quest("DUNGEON_3", 3).await;
        let ten = h.add_quest("DUNGEON_10", 10).await;
        let subject = SubjectId::new();
        let event = completion(subject);

        assert_eq!(
            h.consumer.handle(event.clone()).await.unwrap(),
            ConsumeOutcome::Applied { updated: 2 }
        );
        assert_eq!(
            h.consumer.handle(event).await.unwrap(),
            ConsumeOutcome::Duplicate
        );

        for quest in [three, ten] {
            let pq = h.progress(subject, quest).await.unwrap();
            assert_eq!(pq.progress_count(), 1, "mode {mode}");
            assert_eq!(pq.status(), QuestStatus::InProgress);
        }
        assert_eq!(h.ledger.processed_count().await, 1);
    }
}

#[tokio::test]
async fn test_reaching_target_completes_quest() {
    let h = TestHarness::new(IdempotencyMode::AtomicClaim);
    let quest = h.add_quest("DUNGEON_3", 3).await;
    let subject = SubjectId::new();

    h.consumer.handle(completion(subject)).await.unwrap();
    h.consumer.handle(completion(subject)).await.unwrap();
    let before = h.progress(subject, quest).await.unwrap();
    assert_eq!(before.progress_count(), 2);
    assert_eq!(before.status(), QuestStatus::InProgress);

    h.consumer.handle(completion(subject)).await.unwrap();

    let after = h.progress(subject, quest).await.unwrap();
    assert_eq!(after.progress_count(), 3);
    assert_eq!(after.status(), QuestStatus::Completed);
    assert!(after.completed_at().is_some());
}

#[tokio::test]
async fn test_concurrent_duplicates_with_atomic_claim_apply_once() {
    let h = TestHarness::gated(IdempotencyMode::AtomicClaim);
    let quest = h.add_quest("DUNGEON_3", 3).await;
    let subject = SubjectId::new();
    let event = completion(subject);

    let first = tokio::spawn({
        let consumer = h.consumer.clone();
        let event = event.clone();
        async move { consumer.handle(event).await }
    });
    let second = tokio::spawn({
        let consumer = h.consumer.clone();
        let event = event.clone();
        async move { consumer.handle(event).await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    let applied: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(applied, [&ConsumeOutcome::Applied { updated: 1 }]);

    // The loser is told to retry rather than acknowledged.
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, ConsumerError::InFlight(id) if *id == event.event_id));
    assert!(loser.is_transient());
    assert_eq!(h.progress(subject, quest).await.unwrap().progress_count(), 1);
}

#[tokio::test]
async fn test_event_claimed_by_dead_worker_is_not_acknowledged() {
    let lease = Duration::seconds(60);
    let ledger = InMemoryEventLedger::new();
    let store = InMemoryAggregateStore::new();
    let catalog = InMemoryQuestCatalog::new();
    let quest = QuestDefinition::new("DUNGEON_3", QuestType::dungeon_completion(), 3);
    let quest_id = quest.id;
    catalog.upsert(quest).await;
    let clock = Arc::new(domain::ManualClock::new(Utc::now()));
    let consumer = CompletionConsumer::new(ledger.clone(), store.clone(), catalog)
        .with_config(ConsumerConfig {
            mode: IdempotencyMode::AtomicClaim,
            claim_lease: lease,
            ..Default::default()
        })
        .with_clock(clock.clone());

    let subject = SubjectId::new();
    let event = completion(subject);
    let crashed_at = Utc::now();
    ledger.try_claim(event.event_id, crashed_at, lease).await.unwrap();
    clock.set(crashed_at + Duration::seconds(10));

    for _ in 0..2 {
        assert!(matches!(
            consumer.handle(event.clone()).await,
            Err(ConsumerError::InFlight(_))
        ));
    }
    assert_eq!(ledger.processed_count().await, 0);

    clock.set(crashed_at + lease + Duration::seconds(1));
    assert_eq!(
        consumer.handle(event.clone()).await.unwrap(),
        ConsumeOutcome::Applied { updated: 1 }
    );
    assert_eq!(
        consumer.handle(event).await.unwrap(),
        ConsumeOutcome::Duplicate
    );

    let pq = Repository::<_, ProgressAggregate>::new(store)
        .load(&ProgressAggregate::key_for(subject, quest_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pq.progress_count(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_with_check_then_record_both_pass_gate() {
    let h = TestHarness::gated(IdempotencyMode::CheckThenRecord);
    let quest = h.add_quest("DUNGEON_3", 3).await;
    let subject = SubjectId::new();
    let event = completion(subject);

    let first = tokio::spawn({
        let consumer = h.consumer.clone();
        let event = event.clone();
        async move { consumer.handle(event).await.unwrap() }
    });
    let second = tokio::spawn({
        let consumer = h.consumer.clone();
        async move { consumer.handle(event).await.unwrap() }
    });

    let outcomes = [first.await.unwrap(), second.await.unwrap()];

    // Both deliveries pass the gate; the aggregate still counts the event once.
    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, ConsumeOutcome::Applied { .. }))
    );
    assert_eq!(h.progress(subject, quest).await.unwrap().progress_count(), 1);
    assert_eq!(h.ledger.processed_count().await, 1);
}

#[tokio::test]
async fn test_partial_failure_is_retried_without_double_count() {
    for mode in [IdempotencyMode::AtomicClaim, IdempotencyMode::CheckThenRecord] {
        let h = TestHarness::new(mode);
        let first_quest = h.add_quest("A_DUNGEON_3", 3).await;
        let second_quest = h.add_quest("B_DUNGEON_5", 5).await;
        let subject = SubjectId::new();
        let event = completion(subject);

        h.store.fail_saves_after(1);
        let err = h.consumer.handle(event.clone()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!h.ledger.exists(event.event_id).await.unwrap());
        assert_eq!(h.ledger.claim_count().await, 0);

        h.store.clear_save_failures();
        assert_eq!(
            h.consumer.handle(event).await.unwrap(),
            ConsumeOutcome::Applied { updated: 1 }
        );

        for quest in [first_quest, second_quest] {
            let pq = h.progress(subject, quest).await.unwrap();
            assert_eq!(pq.progress_count(), 1, "mode {mode}");
        }
    }
}

#[tokio::test]
async fn test_ledger_outage_applies_nothing() {
    let h = TestHarness::new(IdempotencyMode::AtomicClaim);
    let quest = h.add_quest("DUNGEON_3", 3).await;
    let subject = SubjectId::new();
    let event = completion(subject);

    h.ledger.set_unavailable(true);
    assert!(h.consumer.handle(event.clone()).await.is_err());
    assert!(h.progress(subject, quest).await.is_none());

    h.ledger.set_unavailable(false);
    assert_eq!(
        h.consumer.handle(event).await.unwrap(),
        ConsumeOutcome::Applied { updated: 1 }
    );
}

#[tokio::test]
async fn test_only_quests_active_at_event_time_count() {
    let h = TestHarness::new(IdempotencyMode::AtomicClaim);
    let now = Utc::now();
    let open = h.add_quest("OPEN", 3).await;

    let last_week = QuestDefinition::new("LAST_WEEK", QuestType::dungeon_completion(), 3)
        .with_window(Some(now - Duration::days(14)), Some(now - Duration::days(7)));
    let retired =
        QuestDefinition::new("RETIRED", QuestType::dungeon_completion(), 3).deactivated();
    let other_type = QuestDefinition::new("PVP", QuestType::new("PVP_VICTORY"), 3);
    let (last_week_id, retired_id, other_type_id) = (last_week.id, retired.id, other_type.id);
    for quest in [last_week, retired, other_type] {
        h.catalog.upsert(quest).await;
    }

    let subject = SubjectId::new();
    assert_eq!(
        h.consumer.handle(completion(subject)).await.unwrap(),
        ConsumeOutcome::Applied { updated: 1 }
    );
    assert!(h.progress(subject, open).await.is_some());
    for quest in [last_week_id, retired_id, other_type_id] {
        assert!(h.progress(subject, quest).await.is_none());
    }

    // A late delivery counts towards the quests active when it happened.
    let late = CompletionNotified::dungeon_completed(subject, now - Duration::days(10));
    assert_eq!(
        h.consumer.handle(late).await.unwrap(),
        ConsumeOutcome::Applied { updated: 2 }
    );
    assert_eq!(
        h.progress(subject, last_week_id).await.unwrap().progress_count(),
        1
    );
}

#[tokio::test]
async fn test_queries_join_progress_with_definitions() {
    let h = TestHarness::new(IdempotencyMode::AtomicClaim);
    h.add_quest("DUNGEON_3", 3).await;
    h.add_quest("DUNGEON_10", 10).await;
    let subject = SubjectId::new();
    h.consumer.handle(completion(subject)).await.unwrap();
    h.consumer.handle(completion(SubjectId::new())).await.unwrap();

    let queries = ProgressQueries::new(h.store.clone(), h.catalog.clone());
    let mut quests = queries.for_subject(subject).await.unwrap();
    quests.sort_by(|a, b| {
        let code = |q: &progress::PlayerQuest| q.definition.as_ref().map(|d| d.code.clone());
        code(a).cmp(&code(b))
    });

    let codes: Vec<_> = quests
        .iter()
        .filter_map(|q| q.definition.as_ref().map(|d| d.code.as_str()))
        .collect();
    assert_eq!(codes, ["DUNGEON_10", "DUNGEON_3"]);
    assert!(quests.iter().all(|q| q.progress.subject_id() == subject));
}
