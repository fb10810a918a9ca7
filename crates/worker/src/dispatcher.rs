//! Routes decoded bus messages to the saga coordinator or the progress consumer.

use std::sync::Arc;
use std::time::Instant;

use domain::{BusMessage, MessageEnvelope};
use progress::{CompletionConsumer, ConsumeOutcome};
use saga::{SagaCoordinator, SagaOutcome};
use tokio::task::JoinHandle;

use crate::error::{Result, WorkerError};
use crate::state::{DynCatalog, DynLedger, DynRecords, DynStore};

pub type Coordinator = SagaCoordinator<DynStore, DynRecords>;
pub type Consumer = CompletionConsumer<DynLedger, DynStore, DynCatalog>;

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Saga(SagaOutcome),
    Progress(ConsumeOutcome),
}

impl Handled {
    pub fn outcome(&self) -> &'static str {
        match self {
            Handled::Saga(outcome) => outcome.as_str(),
            Handled::Progress(ConsumeOutcome::Applied { .. }) => "applied",
            Handled::Progress(ConsumeOutcome::Duplicate) => "duplicate",
        }
    }
}

/// Hands each message to the component that owns it.
pub struct Dispatcher {
    coordinator: Arc<Coordinator>,
    consumer: Arc<Consumer>,
}

impl Dispatcher {
    pub fn new(coordinator: Arc<Coordinator>, consumer: Arc<Consumer>) -> Self {
        Self {
            coordinator,
            consumer,
        }
    }

    /// Decodes the envelope and handles the message.
    #[tracing::instrument(
        skip(self, envelope),
        fields(event_id = %envelope.event_id, event_type = %envelope.event_type)
    )]
    pub async fn dispatch(&self, envelope: MessageEnvelope) -> Result<Handled> {
        let started = Instant::now();
        let result = self.route(&envelope).await;

        let outcome = match &result {
            Ok(handled) => handled.outcome(),
            Err(e) if e.is_critical() => "critical",
            Err(e) if e.is_transient() => "transient",
            Err(_) => "rejected",
        };
        metrics::histogram!(
            "message_handle_duration_seconds",
            "event_type" => envelope.event_type.clone(),
            "outcome" => outcome,
        )
        .record(started.elapsed().as_secs_f64());

        result
    }

    /// Handles the message on its own task.
    pub fn spawn(self: &Arc<Self>, envelope: MessageEnvelope) -> JoinHandle<Result<Handled>> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(envelope).await })
    }

    /// Handles the message on its own task and waits for the result.
    pub async fn dispatch_spawned(self: &Arc<Self>, envelope: MessageEnvelope) -> Result<Handled> {
        self.spawn(envelope)
            .await
            .map_err(|e| WorkerError::Task(e.to_string()))?
    }

    async fn route(&self, envelope: &MessageEnvelope) -> Result<Handled> {
        let handled = match envelope.decode()? {
            BusMessage::Created(m) => Handled::Saga(self.coordinator.handle_created(m).await?),
            BusMessage::Confirmed(m) => {
                Handled::Saga(self.coordinator.handle_confirmed(m).await?)
            }
            BusMessage::Rejected(m) => {
                Handled::Saga(self.coordinator.handle_rejected(m).await?)
            }
            BusMessage::Completion(m) => Handled::Progress(self.consumer.handle(m).await?),
        };
        Ok(handled)
    }
}
