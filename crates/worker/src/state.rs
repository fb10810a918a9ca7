//! Backend selection and shared handler state.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use progress::{
    ConsumerConfig, InMemoryQuestCatalog, PostgresQuestCatalog, ProgressQueries, QuestCatalog,
};
use saga::{InMemoryRecordStore, PostgresRecordStore, RecordStore, SagaReconciler};
use sqlx::postgres::PgPoolOptions;
use store::{
    AggregateStore, EventLedger, InMemoryAggregateStore, InMemoryEventLedger,
    PostgresAggregateStore, PostgresEventLedger,
};

use crate::config::Config;
use crate::dispatcher::{Consumer, Coordinator, Dispatcher};
use crate::error::Result;

pub type DynStore = Arc<dyn AggregateStore>;
pub type DynLedger = Arc<dyn EventLedger>;
pub type DynRecords = Arc<dyn RecordStore>;
pub type DynCatalog = Arc<dyn QuestCatalog>;

/// Storage handles passed to every component.
#[derive(Clone)]
pub struct Backends {
    pub store: DynStore,
    pub ledger: DynLedger,
    pub records: DynRecords,
    pub catalog: DynCatalog,
}

impl Backends {
    /// Process-local stores; state is lost on restart.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryAggregateStore::new()),
            ledger: Arc::new(InMemoryEventLedger::new()),
            records: Arc::new(InMemoryRecordStore::new()),
            catalog: Arc::new(InMemoryQuestCatalog::new()),
        }
    }

    /// Connects to PostgreSQL and runs pending migrations.
    pub async fn postgres(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(store::StoreError::from)?;
        store::run_migrations(&pool).await?;

        Ok(Self {
            store: Arc::new(PostgresAggregateStore::new(pool.clone())),
            ledger: Arc::new(PostgresEventLedger::new(pool.clone())),
            records: Arc::new(PostgresRecordStore::new(pool.clone())),
            catalog: Arc::new(PostgresQuestCatalog::new(pool)),
        })
    }

    /// Picks PostgreSQL when a database URL is configured.
    pub async fn from_config(config: &Config) -> Result<Self> {
        match &config.database_url {
            Some(url) => Self::postgres(url, config.db_max_connections).await,
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub consumer: Arc<Consumer>,
    pub dispatcher: Arc<Dispatcher>,
    pub queries: ProgressQueries<DynStore, DynCatalog>,
    pub reconcile_interval: StdDuration,
    pending_timeout: Duration,
    parked_ttl: Duration,
}

impl AppState {
    /// Wires the coordinator, consumer and dispatcher over the given backends.
    pub fn new(backends: Backends, config: &Config) -> Self {
        let coordinator = Arc::new(Coordinator::new(
            backends.store.clone(),
            backends.records.clone(),
        ));
        let consumer = Arc::new(
            Consumer::new(
                backends.ledger.clone(),
                backends.store.clone(),
                backends.catalog.clone(),
            )
            .with_config(ConsumerConfig {
                mode: config.idempotency_mode,
                claim_lease: config.claim_lease(),
                ..Default::default()
            }),
        );
        let dispatcher = Arc::new(Dispatcher::new(coordinator.clone(), consumer.clone()));

        Self {
            coordinator,
            consumer,
            dispatcher,
            queries: ProgressQueries::new(backends.store, backends.catalog),
            reconcile_interval: StdDuration::from_secs(config.reconcile_interval_secs.max(1)),
            pending_timeout: config.saga_pending_timeout(),
            parked_ttl: config.parked_decision_ttl(),
        }
    }

    /// Builds the reconciler for this state's coordinator.
    pub fn reconciler(&self) -> SagaReconciler<DynStore, DynRecords> {
        SagaReconciler::new(
            self.coordinator.clone(),
            self.pending_timeout,
            self.parked_ttl,
        )
    }
}
