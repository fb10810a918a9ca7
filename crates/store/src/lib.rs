//! Durable building blocks shared by the saga coordinator and the progress consumer.
//!
//! - [`EventLedger`]: the set of event ids whose effects were applied
//! - [`AggregateStore`]: versioned key-value documents with optimistic concurrency
//! - [`Repository`]: typed, serde-backed access to an aggregate store
//!
//! Each contract has an in-memory and a PostgreSQL implementation.

pub mod document;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod repository;
pub mod store;

pub use document::{DocumentWrite, StoredDocument, Version};
pub use error::{Result, StoreError};
pub use ledger::{ClaimOutcome, ProcessedEventRecord};
pub use memory::{InMemoryAggregateStore, InMemoryEventLedger};
pub use postgres::{PostgresAggregateStore, PostgresEventLedger, run_migrations};
pub use query::DocumentQuery;
pub use repository::{Document, Repository};
pub use store::{AggregateStore, EventLedger};
