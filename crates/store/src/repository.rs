//! Typed access to an [`AggregateStore`].

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{AggregateStore, DocumentQuery, DocumentWrite, Result, StoredDocument, Version};

/// A type that can be kept in an aggregate store.
///
/// The version is owned by the store and is not part of the serialized body;
/// implementors keep it in a `#[serde(skip)]` field.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Collection holding documents of this type.
    const COLLECTION: &'static str;

    /// Natural key of this document.
    fn key(&self) -> String;

    /// Indexed label used for filtered queries.
    fn tag(&self) -> Option<String> {
        None
    }

    /// When the document was last changed.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Version the document was loaded at (initial for a new document).
    fn version(&self) -> Version;

    /// Records the version assigned by the store.
    fn set_version(&mut self, version: Version);
}

/// Loads and saves documents of one type through a shared store handle.
pub struct Repository<S, T> {
    store: S,
    _marker: PhantomData<fn() -> T>,
}

impl<S: Clone, T> Clone for Repository<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S, T> Repository<S, T>
where
    S: AggregateStore,
    T: Document,
{
    /// Creates a repository over the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads a document by key.
    pub async fn load(&self, key: &str) -> Result<Option<T>> {
        match self.store.load(T::COLLECTION, key).await? {
            Some(stored) => Ok(Some(Self::decode(stored)?)),
            None => Ok(None),
        }
    }

    /// Saves a document with an optimistic version check.
    ///
    /// On success the document's version is advanced to the stored one.
    pub async fn save(&self, document: &mut T) -> Result<()> {
        let write = DocumentWrite {
            collection: T::COLLECTION.to_string(),
            key: document.key(),
            tag: document.tag(),
            updated_at: document.updated_at(),
            state: serde_json::to_value(&*document)?,
        };
        let version = self.store.save(write, document.version()).await?;
        document.set_version(version);
        Ok(())
    }

    /// Returns all documents of this type matching the query.
    pub async fn query(&self, query: DocumentQuery) -> Result<Vec<T>> {
        let query = query.collection(T::COLLECTION);
        self.store
            .query(query)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    /// Deletes a document if it has not changed since it was loaded.
    pub async fn delete(&self, document: &T) -> Result<bool> {
        self.store
            .delete(T::COLLECTION, &document.key(), document.version())
            .await
    }

    fn decode(stored: StoredDocument) -> Result<T> {
        let mut document: T = serde_json::from_value(stored.state)?;
        document.set_version(stored.version);
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryAggregateStore, StoreError};
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Counter {
        name: String,
        value: u32,
        updated_at: DateTime<Utc>,
        #[serde(skip)]
        version: Version,
    }

    impl Document for Counter {
        const COLLECTION: &'static str = "counters";

        fn key(&self) -> String {
            self.name.clone()
        }

        fn tag(&self) -> Option<String> {
            Some(if self.value > 0 { "positive" } else { "zero" }.to_string())
        }

        fn updated_at(&self) -> DateTime<Utc> {
            self.updated_at
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }
    }

    fn counter(name: &str) -> Counter {
        Counter {
            name: name.to_string(),
            value: 0,
            updated_at: Utc::now(),
            version: Version::initial(),
        }
    }

    #[tokio::test]
    async fn save_then_load_restores_version() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryAggregateStore::new());
        let mut c = counter("a");
        repo.save(&mut c).await.unwrap();
        assert_eq!(c.version(), Version::new(1));

        c.value = 5;
        repo.save(&mut c).await.unwrap();

        let loaded = repo.load("a").await.unwrap().unwrap();
        assert_eq!(loaded.value, 5);
        assert_eq!(loaded.version(), Version::new(2));
    }

    #[tokio::test]
    async fn stale_save_is_rejected() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryAggregateStore::new());
        let mut first = counter("a");
        repo.save(&mut first).await.unwrap();

        let mut stale = repo.load("a").await.unwrap().unwrap();
        first.value = 1;
        repo.save(&mut first).await.unwrap();

        stale.value = 2;
        let err = repo.save(&mut stale).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn query_uses_document_collection_and_tag() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryAggregateStore::new());
        let mut a = counter("a");
        let mut b = counter("b");
        b.value = 3;
        repo.save(&mut a).await.unwrap();
        repo.save(&mut b).await.unwrap();

        let positive = repo
            .query(DocumentQuery::new().tag("positive"))
            .await
            .unwrap();
        assert_eq!(positive.len(), 1);
        assert_eq!(positive[0].name, "b");
        assert_eq!(positive[0].version(), Version::new(1));
    }

    #[tokio::test]
    async fn delete_requires_current_version() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryAggregateStore::new());
        let mut c = counter("a");
        repo.save(&mut c).await.unwrap();

        let stale = c.clone();
        c.value = 1;
        repo.save(&mut c).await.unwrap();

        assert!(!repo.delete(&stale).await.unwrap());
        assert!(repo.delete(&c).await.unwrap());
        assert!(repo.load("a").await.unwrap().is_none());
    }
}
