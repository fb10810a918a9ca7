use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the ledger or aggregate store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An optimistic concurrency check failed.
    /// The expected version did not match the stored version.
    #[error(
        "Concurrency conflict on {collection}/{key}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        collection: String,
        key: String,
        expected: Version,
        actual: Version,
    },

    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for failures that a redelivery of the same message may get past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Database(_) | StoreError::ConcurrencyConflict { .. }
        )
    }

    /// Returns true if this is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
