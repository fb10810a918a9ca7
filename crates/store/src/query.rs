use chrono::{DateTime, Utc};

/// Builder for filtering documents within one collection.
///
/// Results are ordered by `updated_at` (oldest first), then by key.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    /// Collection to search. Set by [`crate::Repository`] for typed access.
    pub collection: String,

    /// Only keys starting with this prefix.
    pub key_prefix: Option<String>,

    /// Only documents carrying this tag.
    pub tag: Option<String>,

    /// Only documents last written strictly before this instant.
    pub updated_before: Option<DateTime<Utc>>,

    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl DocumentQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query over a collection.
    pub fn for_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Sets the collection.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Filters by key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Filters by tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Filters by last write time.
    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
