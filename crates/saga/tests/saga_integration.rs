//! Integration tests for the character creation saga.

use std::sync::Arc;

use chrono::Duration;
use common::CorrelationKey;
use domain::{Clock, EntityConfirmed, EntityCreated, EntityRejected, ManualClock};
use saga::{
    ChannelReporter, CompensationOutcome, CreatedRecord, Inconsistency, InMemoryRecordStore,
    SagaCoordinator, SagaInstance, SagaOutcome, SagaReconciler, SagaState, SweepReport,
};
use store::{InMemoryAggregateStore, Repository};
use tokio::sync::mpsc::UnboundedReceiver;

type TestCoordinator = SagaCoordinator<InMemoryAggregateStore, InMemoryRecordStore>;

struct TestHarness {
    coordinator: Arc<TestCoordinator>,
    store: InMemoryAggregateStore,
    records: InMemoryRecordStore,
    clock: Arc<ManualClock>,
    alerts: UnboundedReceiver<Inconsistency>,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryAggregateStore::new();
        let records = InMemoryRecordStore::new();
        let clock = Arc::new(ManualClock::default());
        let (reporter, alerts) = ChannelReporter::new();

        let coordinator = SagaCoordinator::new(store.clone(), records.clone())
            .with_clock(clock.clone())
            .with_reporter(Arc::new(reporter));

        Self {
            coordinator: Arc::new(coordinator),
            store,
            records,
            clock,
            alerts,
        }
    }

    /// Creates the character locally and delivers its creation event.
    async fn create_character(&self, id: &str, name: &str) -> SagaOutcome {
        self.records.insert(CreatedRecord::new(id, name, "user-1"));
        self.coordinator
            .handle_created(EntityCreated {
                subject_id: id.into(),
                owner_id: Some("user-1".to_string()),
            })
            .await
            .unwrap()
    }

    async fn confirm(&self, id: &str) -> SagaOutcome {
        self.coordinator
            .handle_confirmed(EntityConfirmed {
                subject_id: id.into(),
                message: "character accepted".to_string(),
            })
            .await
            .unwrap()
    }

    async fn reject(&self, id: &str, reason: &str) -> SagaOutcome {
        self.coordinator
            .handle_rejected(EntityRejected {
                subject_id: id.into(),
                reason: reason.to_string(),
            })
            .await
            .unwrap()
    }

    async fn state_of(&self, id: &str) -> Option<SagaState> {
        self.coordinator
            .get_saga(&id.into())
            .await
            .unwrap()
            .map(|s| s.state())
    }

    fn reconciler(&self) -> SagaReconciler<InMemoryAggregateStore, InMemoryRecordStore> {
        SagaReconciler::new(
            self.coordinator.clone(),
            Duration::hours(24),
            Duration::hours(1),
        )
    }
}

#[tokio::test]
async fn test_confirmation_completes_saga_and_keeps_character() {
    let h = TestHarness::new();

    assert_eq!(h.create_character("C1", "Aria").await, SagaOutcome::Opened);
    assert_eq!(h.confirm("C1").await, SagaOutcome::Completed);

    let saga = h.coordinator.get_saga(&"C1".into()).await.unwrap().unwrap();
    assert_eq!(saga.state(), SagaState::Completed);
    assert_eq!(saga.confirmation_message(), Some("character accepted"));
    assert_eq!(saga.owner_id(), Some("user-1"));
    assert!(h.records.contains(&"C1".into()));
}

#[tokio::test]
async fn test_rejection_fails_saga_and_deletes_character() {
    let h = TestHarness::new();
    h.create_character("C2", "Borin").await;

    let outcome = h.reject("C2", "duplicate name").await;

    assert_eq!(outcome, SagaOutcome::Failed(CompensationOutcome::Deleted));
    let saga = h.coordinator.get_saga(&"C2".into()).await.unwrap().unwrap();
    assert_eq!(saga.state(), SagaState::Failed);
    assert_eq!(saga.failure_reason(), Some("duplicate name"));
    assert_eq!(saga.compensation(), Some(CompensationOutcome::Deleted));
    assert!(!h.records.contains(&"C2".into()));
}

#[tokio::test]
async fn test_rejection_without_saga_compensates_nothing() {
    let h = TestHarness::new();
    h.records.insert(CreatedRecord::new("C9", "Unrelated", "user-9"));

    let outcome = h.reject("C9", "unknown").await;

    assert_eq!(outcome, SagaOutcome::Parked);
    assert_eq!(h.records.delete_calls(), 0);
    assert!(h.records.contains(&"C9".into()));
    assert_eq!(h.state_of("C9").await, None);
}

#[tokio::test]
async fn test_duplicate_decisions_are_ignored() {
    let h = TestHarness::new();
    h.create_character("C3", "Cyra").await;

    assert_eq!(
        h.reject("C3", "banned word").await,
        SagaOutcome::Failed(CompensationOutcome::Deleted)
    );
    assert_eq!(h.reject("C3", "banned word").await, SagaOutcome::Duplicate);
    assert_eq!(h.confirm("C3").await, SagaOutcome::Duplicate);

    assert_eq!(h.state_of("C3").await, Some(SagaState::Failed));
    assert_eq!(h.records.delete_calls(), 1);
}

#[tokio::test]
async fn test_already_missing_character_still_fails_saga() {
    let h = TestHarness::new();
    h.create_character("C4", "Dain").await;
    assert!(saga::RecordStore::delete(&h.records, &"C4".into()).await.unwrap());

    let outcome = h.reject("C4", "duplicate name").await;

    assert_eq!(outcome, SagaOutcome::Failed(CompensationOutcome::AlreadyAbsent));
    assert_eq!(h.state_of("C4").await, Some(SagaState::Failed));
}

#[tokio::test]
async fn test_parked_rejection_replays_on_late_creation() {
    let h = TestHarness::new();

    assert_eq!(h.reject("C5", "duplicate name").await, SagaOutcome::Parked);
    assert_eq!(h.store.document_count("parked_decisions").await, 1);

    let outcome = h.create_character("C5", "Eira").await;

    assert_eq!(outcome, SagaOutcome::Failed(CompensationOutcome::Deleted));
    assert_eq!(h.state_of("C5").await, Some(SagaState::Failed));
    assert!(!h.records.contains(&"C5".into()));
    assert_eq!(h.store.document_count("parked_decisions").await, 0);
}

#[tokio::test]
async fn test_parked_confirmation_replays_on_late_creation() {
    let h = TestHarness::new();

    assert_eq!(h.confirm("C6").await, SagaOutcome::Parked);
    assert_eq!(h.create_character("C6", "Fenn").await, SagaOutcome::Completed);

    assert_eq!(h.state_of("C6").await, Some(SagaState::Completed));
    assert!(h.records.contains(&"C6".into()));
}

#[tokio::test]
async fn test_first_parked_decision_wins() {
    let h = TestHarness::new();

    h.confirm("C7").await;
    assert_eq!(h.reject("C7", "late veto").await, SagaOutcome::Parked);

    assert_eq!(h.create_character("C7", "Gale").await, SagaOutcome::Completed);
    assert_eq!(h.store.document_count("parked_decisions").await, 0);
}

#[tokio::test]
async fn test_delete_failure_is_critical_and_retryable() {
    let mut h = TestHarness::new();
    h.create_character("C8", "Hale").await;
    h.records.set_fail_on_delete(true);

    let err = h
        .coordinator
        .handle_rejected(EntityRejected {
            subject_id: "C8".into(),
            reason: "duplicate name".to_string(),
        })
        .await
        .unwrap_err();

    assert!(err.is_critical());
    assert!(!err.is_transient());
    assert_eq!(h.state_of("C8").await, Some(SagaState::Initiated));
    let alert = h.alerts.try_recv().unwrap();
    assert_eq!(alert.correlation_key, CorrelationKey::from("C8"));
    assert!(alert.reason.contains("delete"));

    h.records.set_fail_on_delete(false);
    assert_eq!(
        h.reject("C8", "duplicate name").await,
        SagaOutcome::Failed(CompensationOutcome::Deleted)
    );
    assert!(h.alerts.try_recv().is_err());
}

#[tokio::test]
async fn test_reconciler_times_out_stuck_saga() {
    let h = TestHarness::new();
    h.create_character("C10", "Ivo").await;
    h.create_character("C11", "Jun").await;
    h.confirm("C11").await;

    h.clock.advance(Duration::hours(25));
    let report = h.reconciler().sweep().await.unwrap();

    assert_eq!(report.timed_out, 1);
    let saga = h.coordinator.get_saga(&"C10".into()).await.unwrap().unwrap();
    assert_eq!(saga.state(), SagaState::Failed);
    assert_eq!(saga.failure_reason(), Some("timed out awaiting decision"));
    assert!(!h.records.contains(&"C10".into()));
    assert_eq!(h.state_of("C11").await, Some(SagaState::Completed));

    assert_eq!(h.confirm("C10").await, SagaOutcome::Duplicate);
}

#[tokio::test]
async fn test_reconciler_expires_parked_decisions() {
    let h = TestHarness::new();
    h.reject("C12", "orphan").await;

    h.clock.advance(Duration::minutes(30));
    assert_eq!(h.reconciler().sweep().await.unwrap(), SweepReport::default());

    h.clock.advance(Duration::minutes(31));
    let report = h.reconciler().sweep().await.unwrap();
    assert_eq!(report.parked_expired, 1);
    assert_eq!(h.store.document_count("parked_decisions").await, 0);

    assert_eq!(h.create_character("C12", "Kael").await, SagaOutcome::Opened);
}

#[tokio::test]
async fn test_reconciler_applies_decision_parked_beside_open_saga() {
    let h = TestHarness::new();
    h.records.insert(CreatedRecord::new("C9", "Nix", "user-1"));
    assert_eq!(h.confirm("C9").await, SagaOutcome::Parked);

    // Another process opened the saga after checking for parked decisions.
    let mut instance = SagaInstance::initiate("C9".into(), None, h.clock.now());
    Repository::<_, SagaInstance>::new(h.store.clone())
        .save(&mut instance)
        .await
        .unwrap();

    h.clock.advance(Duration::hours(2));
    let report = h.reconciler().sweep().await.unwrap();
    assert_eq!(report.parked_replayed, 1);
    assert_eq!(report.parked_expired, 0);
    assert_eq!(h.state_of("C9").await, Some(SagaState::Completed));

    h.clock.advance(Duration::hours(25));
    assert_eq!(h.reconciler().sweep().await.unwrap(), SweepReport::default());
    assert_eq!(h.state_of("C9").await, Some(SagaState::Completed));
    assert!(h.records.contains(&"C9".into()));
    assert_eq!(h.store.document_count("parked_decisions").await, 0);
}

#[tokio::test]
async fn test_reconciler_counts_failed_compensations() {
    let mut h = TestHarness::new();
    h.create_character("C13", "Lyra").await;
    h.records.set_fail_on_delete(true);

    h.clock.advance(Duration::hours(25));
    let report = h.reconciler().sweep().await.unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.timed_out, 0);
    assert_eq!(h.state_of("C13").await, Some(SagaState::Initiated));
    assert!(h.alerts.try_recv().is_ok());
}

#[tokio::test]
async fn test_concurrent_decisions_reach_one_terminal_state() {
    let h = TestHarness::new();
    h.create_character("C14", "Mira").await;

    let confirm = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .handle_confirmed(EntityConfirmed {
                    subject_id: "C14".into(),
                    message: "ok".to_string(),
                })
                .await
                .unwrap()
        })
    };
    let reject = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .handle_rejected(EntityRejected {
                    subject_id: "C14".into(),
                    reason: "no".to_string(),
                })
                .await
                .unwrap()
        })
    };

    let outcomes = [confirm.await.unwrap(), reject.await.unwrap()];
    let duplicates = outcomes
        .iter()
        .filter(|o| **o == SagaOutcome::Duplicate)
        .count();
    assert_eq!(duplicates, 1);

    match h.state_of("C14").await {
        Some(SagaState::Completed) => assert!(h.records.contains(&"C14".into())),
        Some(SagaState::Failed) => assert!(!h.records.contains(&"C14".into())),
        other => panic!("unexpected state {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_duplicate_creations_open_once() {
    let h = TestHarness::new();
    h.records.insert(CreatedRecord::new("C15", "Nox", "user-1"));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .handle_created(EntityCreated {
                        subject_id: "C15".into(),
                        owner_id: None,
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    let outcomes = futures_util::future::join_all(handles).await;
    let opened = outcomes
        .into_iter()
        .filter(|o| *o.as_ref().unwrap() == SagaOutcome::Opened)
        .count();
    assert_eq!(opened, 1);
    assert_eq!(h.store.document_count("saga_instances").await, 1);
}
