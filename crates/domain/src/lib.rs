//! Domain layer shared by the saga coordinator and the progress consumer.
//!
//! - Bus message contracts and their JSON envelope
//! - Quest definitions and per-player progress with its update rule
//! - A clock abstraction so timeouts and timestamps are testable

pub mod clock;
pub mod error;
pub mod messages;
pub mod quest;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, Result};
pub use messages::{
    BusMessage, CompletionNotified, EntityConfirmed, EntityCreated, EntityRejected,
    MessageEnvelope,
};
pub use quest::{ProgressAggregate, ProgressChange, QuestDefinition, QuestStatus, QuestType};
