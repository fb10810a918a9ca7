//! Periodic repair of sagas that never received a decision.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use store::AggregateStore;
use tokio::sync::watch;
use tokio::time;

use crate::coordinator::{ParkedResolution, SagaCoordinator, SagaOutcome};
use crate::error::Result;
use crate::services::RecordStore;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sagas failed for waiting longer than the pending timeout.
    pub timed_out: usize,
    /// Parked decisions applied to a saga that was opened without them.
    pub parked_replayed: usize,
    /// Parked decisions dropped for outliving their TTL.
    pub parked_expired: usize,
    /// Sagas or parked decisions that could not be settled this pass.
    pub errors: usize,
}

/// Applies stranded parked decisions, fails stuck sagas and expires
/// parked decisions.
pub struct SagaReconciler<S, R> {
    coordinator: Arc<SagaCoordinator<S, R>>,
    pending_timeout: Duration,
    parked_ttl: Duration,
}

impl<S, R> SagaReconciler<S, R>
where
    S: AggregateStore + Clone,
    R: RecordStore,
{
    pub fn new(
        coordinator: Arc<SagaCoordinator<S, R>>,
        pending_timeout: Duration,
        parked_ttl: Duration,
    ) -> Self {
        Self {
            coordinator,
            pending_timeout,
            parked_ttl,
        }
    }

    /// Runs one reconciliation pass.
    ///
    /// Parked decisions are settled before any saga is timed out, so a
    /// saga whose decision was parked is never compensated for lack of one.
    /// A key that cannot be settled is counted and skipped; critical
    /// failures have already been reported by the coordinator.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.coordinator.now();
        let mut report = SweepReport::default();

        let parked_cutoff = now - self.parked_ttl;
        for parked in self.coordinator.parked_decisions().await? {
            let key = parked.correlation_key();
            match self.coordinator.settle_parked(key, parked_cutoff).await {
                Ok(ParkedResolution::Replayed(_)) => report.parked_replayed += 1,
                Ok(ParkedResolution::Expired) => report.parked_expired += 1,
                Ok(ParkedResolution::Kept) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(
                        correlation_key = %key,
                        error = %e,
                        "could not settle parked decision"
                    );
                }
            }
        }

        for saga in self.coordinator.pending_before(now - self.pending_timeout).await? {
            let key = saga.correlation_key();
            match self.coordinator.time_out(key).await {
                Ok(SagaOutcome::Failed(_)) => report.timed_out += 1,
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(correlation_key = %key, error = %e, "could not time out saga");
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                timed_out = report.timed_out,
                parked_replayed = report.parked_replayed,
                parked_expired = report.parked_expired,
                errors = report.errors,
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to true.
    pub async fn run(&self, interval: StdDuration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("saga reconciler shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(error = %e, "reconciliation pass failed");
                    }
                }
            }
        }
    }
}
