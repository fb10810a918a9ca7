use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version number of a stored document, used for optimistic concurrency control.
///
/// A document that has never been written is at version 0. Every successful
/// save moves it to the next version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a document that does not exist yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if this is the version of a document that was never saved.
    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A document as held by an aggregate store.
///
/// The store treats `state` as opaque JSON; typed access goes through
/// [`crate::Repository`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Logical collection the document belongs to (e.g. `"saga_instances"`).
    pub collection: String,

    /// Natural key of the document within its collection.
    pub key: String,

    /// Version after the last successful save.
    pub version: Version,

    /// Optional indexed label (e.g. a state name) for filtered queries.
    pub tag: Option<String>,

    /// When the document was last written.
    pub updated_at: DateTime<Utc>,

    /// Serialized document body.
    pub state: serde_json::Value,
}

/// A write request for a single document.
#[derive(Debug, Clone)]
pub struct DocumentWrite {
    pub collection: String,
    pub key: String,
    pub tag: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub state: serde_json::Value,
}

impl DocumentWrite {
    /// Materializes the write as a stored document at `version`.
    pub fn into_stored(self, version: Version) -> StoredDocument {
        StoredDocument {
            collection: self.collection,
            key: self.key,
            version,
            tag: self.tag,
            updated_at: self.updated_at,
            state: self.state,
        }
    }
}
