//! Identifier types shared by the saga and progress crates.

pub mod types;

pub use types::{CorrelationKey, EventId, QuestId, SubjectId};
