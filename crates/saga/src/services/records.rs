//! Created-record store trait with in-memory and PostgreSQL implementations.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::CorrelationKey;
use sqlx::PgPool;

use crate::error::SagaError;

/// A locally created record awaiting the remote decision (a character).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub id: CorrelationKey,
    pub name: String,
    pub owner_id: String,
}

impl CreatedRecord {
    pub fn new(
        id: impl Into<CorrelationKey>,
        name: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: owner_id.into(),
        }
    }
}

/// Access to the records the saga may have to compensate.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Looks up a record by id.
    async fn get_by_id(&self, id: &CorrelationKey) -> Result<Option<CreatedRecord>, SagaError>;

    /// Deletes a record. Returns false if it was already gone.
    async fn delete(&self, id: &CorrelationKey) -> Result<bool, SagaError>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn get_by_id(&self, id: &CorrelationKey) -> Result<Option<CreatedRecord>, SagaError> {
        (**self).get_by_id(id).await
    }

    async fn delete(&self, id: &CorrelationKey) -> Result<bool, SagaError> {
        (**self).delete(id).await
    }
}

#[derive(Debug, Default)]
struct InMemoryRecordState {
    records: HashMap<CorrelationKey, CreatedRecord>,
    fail_on_get: bool,
    fail_on_delete: bool,
    delete_calls: usize,
}

/// In-memory record store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    state: Arc<RwLock<InMemoryRecordState>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty record store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record, as the creating command handler would.
    pub fn insert(&self, record: CreatedRecord) {
        self.write().records.insert(record.id.clone(), record);
    }

    /// Makes lookups fail while set.
    pub fn set_fail_on_get(&self, fail: bool) {
        self.write().fail_on_get = fail;
    }

    /// Makes deletions fail while set.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.write().fail_on_delete = fail;
    }

    /// Returns true if a record exists with the given id.
    pub fn contains(&self, id: &CorrelationKey) -> bool {
        self.read().records.contains_key(id)
    }

    /// Returns the number of stored records.
    pub fn record_count(&self) -> usize {
        self.read().records.len()
    }

    /// Returns how many deletions were attempted.
    pub fn delete_calls(&self) -> usize {
        self.read().delete_calls
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryRecordState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryRecordState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_by_id(&self, id: &CorrelationKey) -> Result<Option<CreatedRecord>, SagaError> {
        let state = self.read();
        if state.fail_on_get {
            return Err(SagaError::RecordStore("record store unreachable".to_string()));
        }
        Ok(state.records.get(id).cloned())
    }

    async fn delete(&self, id: &CorrelationKey) -> Result<bool, SagaError> {
        let mut state = self.write();
        state.delete_calls += 1;
        if state.fail_on_delete {
            return Err(SagaError::RecordStore("delete rejected".to_string()));
        }
        Ok(state.records.remove(id).is_some())
    }
}

/// PostgreSQL-backed record store over the `characters` table.
#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Creates a record store using the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a record.
    pub async fn insert(&self, record: &CreatedRecord) -> Result<(), SagaError> {
        sqlx::query("INSERT INTO characters (id, name, owner_id) VALUES ($1, $2, $3)")
            .bind(record.id.as_str())
            .bind(&record.name)
            .bind(&record.owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SagaError::RecordStore(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn get_by_id(&self, id: &CorrelationKey) -> Result<Option<CreatedRecord>, SagaError> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, name, owner_id FROM characters WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SagaError::RecordStore(e.to_string()))?;

        Ok(row.map(|(id, name, owner_id)| CreatedRecord::new(id, name, owner_id)))
    }

    async fn delete(&self, id: &CorrelationKey) -> Result<bool, SagaError> {
        let result = sqlx::query("DELETE FROM characters WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| SagaError::RecordStore(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }
}
