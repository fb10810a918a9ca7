//! Saga pattern implementation for character creation.
//!
//! A character is created locally and published; a remote service later
//! confirms or rejects it. The coordinator keeps one saga per character id:
//! 1. `EntityCreated` opens the saga in `Initiated`
//! 2. `EntityConfirmed` moves it to `Completed`
//! 3. `EntityRejected` deletes the character, then moves it to `Failed`
//!
//! Decisions that arrive before their saga are parked and replayed. Sagas
//! left waiting too long are failed by the reconciler.

pub mod alert;
pub mod character_creation;
pub mod compensation;
pub mod coordinator;
pub mod correlation;
pub mod error;
pub mod instance;
pub mod parked;
pub mod reconciler;
pub mod services;
pub mod state;

pub use alert::{ChannelReporter, Inconsistency, InconsistencyReporter, LoggingReporter};
pub use compensation::{CompensationExecutor, CompensationOutcome};
pub use coordinator::{ParkedResolution, SagaCoordinator, SagaOutcome};
pub use correlation::CorrelationLocks;
pub use error::{Result, SagaError};
pub use instance::SagaInstance;
pub use parked::{Decision, ParkedDecision};
pub use reconciler::{SagaReconciler, SweepReport};
pub use services::{CreatedRecord, InMemoryRecordStore, PostgresRecordStore, RecordStore};
pub use state::SagaState;
