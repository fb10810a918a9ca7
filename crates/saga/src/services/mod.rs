//! Collaborator services the saga compensates against.

pub mod records;

pub use records::{CreatedRecord, InMemoryRecordStore, PostgresRecordStore, RecordStore};
