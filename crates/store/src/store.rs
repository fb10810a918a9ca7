use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::EventId;

use crate::{
    ClaimOutcome, DocumentQuery, DocumentWrite, ProcessedEventRecord, Result, StoredDocument,
    Version,
};

/// Durable key-value store for saga instances and progress aggregates.
///
/// Every write is guarded by the document version: saving with
/// `expected = Version::initial()` creates the document only if it is absent,
/// any other expected version must match the stored one. A mismatch fails
/// with `ConcurrencyConflict`.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Loads a single document.
    async fn load(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>>;

    /// Saves a document, returning its new version.
    async fn save(&self, write: DocumentWrite, expected: Version) -> Result<Version>;

    /// Returns documents matching a query.
    async fn query(&self, query: DocumentQuery) -> Result<Vec<StoredDocument>>;

    /// Deletes a document if it is still at `expected`.
    ///
    /// Returns false if the document is missing or was changed concurrently.
    async fn delete(&self, collection: &str, key: &str, expected: Version) -> Result<bool>;
}

/// Durable set of event ids whose effects have been applied.
///
/// Two gating styles are supported: the plain `exists` + `insert` pair, which
/// is not atomic as a unit, and the `try_claim` / `commit` / `release`
/// protocol, where the claim itself is an atomic insert-if-absent.
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Returns true if a processed record exists for the event.
    async fn exists(&self, event_id: EventId) -> Result<bool>;

    /// Returns the processed record for the event, if any.
    async fn get(&self, event_id: EventId) -> Result<Option<ProcessedEventRecord>>;

    /// Records the event as processed unless a record already exists.
    ///
    /// Returns true if this call wrote the record.
    async fn insert(&self, event_id: EventId, processed_at: DateTime<Utc>) -> Result<bool>;

    /// Atomically reserves the event for the caller.
    ///
    /// A claim older than `lease` is considered abandoned and can be taken over.
    async fn try_claim(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome>;

    /// Turns the caller's claim into the processed record.
    async fn commit(&self, event_id: EventId, processed_at: DateTime<Utc>) -> Result<()>;

    /// Drops the caller's unfinished claim so a redelivery can process the
    /// event again.
    ///
    /// `claimed_at` is the time the caller passed to `try_claim`. A claim
    /// taken over by another worker since then is left in place.
    async fn release(&self, event_id: EventId, claimed_at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
impl<T: AggregateStore + ?Sized> AggregateStore for std::sync::Arc<T> {
    async fn load(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        (**self).load(collection, key).await
    }

    async fn save(&self, write: DocumentWrite, expected: Version) -> Result<Version> {
        (**self).save(write, expected).await
    }

    async fn query(&self, query: DocumentQuery) -> Result<Vec<StoredDocument>> {
        (**self).query(query).await
    }

    async fn delete(&self, collection: &str, key: &str, expected: Version) -> Result<bool> {
        (**self).delete(collection, key, expected).await
    }
}

#[async_trait]
impl<T: EventLedger + ?Sized> EventLedger for std::sync::Arc<T> {
    async fn exists(&self, event_id: EventId) -> Result<bool> {
        (**self).exists(event_id).await
    }

    async fn get(&self, event_id: EventId) -> Result<Option<ProcessedEventRecord>> {
        (**self).get(event_id).await
    }

    async fn insert(&self, event_id: EventId, processed_at: DateTime<Utc>) -> Result<bool> {
        (**self).insert(event_id, processed_at).await
    }

    async fn try_claim(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome> {
        (**self).try_claim(event_id, now, lease).await
    }

    async fn commit(&self, event_id: EventId, processed_at: DateTime<Utc>) -> Result<()> {
        (**self).commit(event_id, processed_at).await
    }

    async fn release(&self, event_id: EventId, claimed_at: DateTime<Utc>) -> Result<()> {
        (**self).release(event_id, claimed_at).await
    }
}

/// Matches a stored document against a query. Shared by backends that filter in memory.
pub(crate) fn matches_query(document: &StoredDocument, query: &DocumentQuery) -> bool {
    if document.collection != query.collection {
        return false;
    }
    if let Some(ref prefix) = query.key_prefix
        && !document.key.starts_with(prefix.as_str())
    {
        return false;
    }
    if let Some(ref tag) = query.tag
        && document.tag.as_ref() != Some(tag)
    {
        return false;
    }
    if let Some(before) = query.updated_before
        && document.updated_at >= before
    {
        return false;
    }
    true
}
