//! Quest catalog and per-player progress.

pub mod definition;
pub mod progress;

pub use definition::{QuestDefinition, QuestType};
pub use progress::{ProgressAggregate, ProgressChange, QuestStatus};
