//! Quest progress driven by completion events.
//!
//! - [`CompletionConsumer`] applies each completion event at most once per
//!   event id, gated by an [`store::EventLedger`]
//! - [`QuestCatalog`] supplies the quests an event counts towards
//! - [`ProgressQueries`] reads progress back for a subject

pub mod catalog;
pub mod consumer;
pub mod error;
pub mod queries;

pub use catalog::{InMemoryQuestCatalog, PostgresQuestCatalog, QuestCatalog};
pub use consumer::{
    CompletionConsumer, ConsumeOutcome, ConsumerConfig, IdempotencyMode, PROGRESS_PER_EVENT,
};
pub use error::{ConsumerError, Result};
pub use queries::{PlayerQuest, ProgressQueries};
