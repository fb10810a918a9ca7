use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::EventId;
use tokio::sync::RwLock;

use crate::store::matches_query;
use crate::{
    AggregateStore, ClaimOutcome, DocumentQuery, DocumentWrite, EventLedger,
    ProcessedEventRecord, Result, StoreError, StoredDocument, Version,
};

/// Injected failures shared by the in-memory backends.
#[derive(Debug)]
struct Faults {
    unavailable: AtomicBool,
    /// Number of saves allowed before saves start failing; `usize::MAX` disables.
    saves_remaining: AtomicUsize,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            unavailable: AtomicBool::new(false),
            saves_remaining: AtomicUsize::new(usize::MAX),
        }
    }
}

impl Faults {
    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn consume_save(&self) -> Result<()> {
        self.check_available()?;
        let allowed = self
            .saves_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(usize::MAX),
                0 => None,
                n => Some(n - 1),
            });
        if allowed.is_err() {
            return Err(StoreError::Unavailable(
                "in-memory store rejected write".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory aggregate store for testing and single-process runs.
///
/// Provides the same versioning semantics as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryAggregateStore {
    documents: Arc<RwLock<HashMap<(String, String), StoredDocument>>>,
    faults: Arc<Faults>,
}

impl InMemoryAggregateStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Lets the next `count` saves succeed and fails every save after that.
    pub fn fail_saves_after(&self, count: usize) {
        self.faults.saves_remaining.store(count, Ordering::SeqCst);
    }

    /// Removes any save failure budget set by [`Self::fail_saves_after`].
    pub fn clear_save_failures(&self) {
        self.faults
            .saves_remaining
            .store(usize::MAX, Ordering::SeqCst);
    }

    /// Returns the number of documents stored in a collection.
    pub async fn document_count(&self, collection: &str) -> usize {
        self.documents
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn load(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        self.faults.check_available()?;
        let documents = self.documents.read().await;
        Ok(documents
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    async fn save(&self, write: DocumentWrite, expected: Version) -> Result<Version> {
        self.faults.consume_save()?;

        let id = (write.collection.clone(), write.key.clone());
        let mut documents = self.documents.write().await;

        let actual = documents
            .get(&id)
            .map(|d| d.version)
            .unwrap_or(Version::initial());

        if actual != expected {
            return Err(StoreError::ConcurrencyConflict {
                collection: write.collection,
                key: write.key,
                expected,
                actual,
            });
        }

        let next = expected.next();
        documents.insert(id, write.into_stored(next));
        Ok(next)
    }

    async fn query(&self, query: DocumentQuery) -> Result<Vec<StoredDocument>> {
        self.faults.check_available()?;
        let documents = self.documents.read().await;
        let mut found: Vec<_> = documents
            .values()
            .filter(|d| matches_query(d, &query))
            .cloned()
            .collect();

        found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.key.cmp(&b.key)));

        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn delete(&self, collection: &str, key: &str, expected: Version) -> Result<bool> {
        self.faults.check_available()?;
        let id = (collection.to_string(), key.to_string());
        let mut documents = self.documents.write().await;
        match documents.get(&id) {
            Some(d) if d.version == expected => {
                documents.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Clone)]
enum LedgerEntry {
    Claimed { claimed_at: DateTime<Utc> },
    Processed(ProcessedEventRecord),
}

/// In-memory event ledger for testing and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryEventLedger {
    entries: Arc<RwLock<HashMap<EventId, LedgerEntry>>>,
    faults: Arc<Faults>,
}

impl InMemoryEventLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of processed records.
    pub async fn processed_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| matches!(e, LedgerEntry::Processed(_)))
            .count()
    }

    /// Returns the number of outstanding claims.
    pub async fn claim_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| matches!(e, LedgerEntry::Claimed { .. }))
            .count()
    }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn exists(&self, event_id: EventId) -> Result<bool> {
        Ok(self.get(event_id).await?.is_some())
    }

    async fn get(&self, event_id: EventId) -> Result<Option<ProcessedEventRecord>> {
        self.faults.check_available()?;
        let entries = self.entries.read().await;
        Ok(match entries.get(&event_id) {
            Some(LedgerEntry::Processed(record)) => Some(record.clone()),
            _ => None,
        })
    }

    async fn insert(&self, event_id: EventId, processed_at: DateTime<Utc>) -> Result<bool> {
        self.faults.check_available()?;
        let mut entries = self.entries.write().await;
        if let Some(LedgerEntry::Processed(_)) = entries.get(&event_id) {
            return Ok(false);
        }
        entries.insert(
            event_id,
            LedgerEntry::Processed(ProcessedEventRecord {
                event_id,
                processed_at,
            }),
        );
        Ok(true)
    }

    async fn try_claim(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome> {
        self.faults.check_available()?;
        let mut entries = self.entries.write().await;
        match entries.get(&event_id) {
            Some(LedgerEntry::Processed(_)) => Ok(ClaimOutcome::AlreadyProcessed),
            Some(LedgerEntry::Claimed { claimed_at }) if *claimed_at + lease > now => {
                Ok(ClaimOutcome::InFlight)
            }
            _ => {
                entries.insert(event_id, LedgerEntry::Claimed { claimed_at: now });
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn commit(&self, event_id: EventId, processed_at: DateTime<Utc>) -> Result<()> {
        self.faults.check_available()?;
        let mut entries = self.entries.write().await;
        if let Some(LedgerEntry::Processed(_)) = entries.get(&event_id) {
            return Ok(());
        }
        entries.insert(
            event_id,
            LedgerEntry::Processed(ProcessedEventRecord {
                event_id,
                processed_at,
            }),
        );
        Ok(())
    }

    async fn release(&self, event_id: EventId, claimed_at: DateTime<Utc>) -> Result<()> {
        self.faults.check_available()?;
        let mut entries = self.entries.write().await;
        if let Some(LedgerEntry::Claimed { claimed_at: held }) = entries.get(&event_id)
            && *held == claimed_at
        {
            entries.remove(&event_id);
        }
        Ok(())
    }
}
