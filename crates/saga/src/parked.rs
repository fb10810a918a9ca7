//! Decisions that arrived before the saga they belong to.

use chrono::{DateTime, Utc};
use common::CorrelationKey;
use serde::{Deserialize, Serialize};
use store::{Document, Version};

/// A remote decision on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Decision {
    Confirmed { message: String },
    Rejected { reason: String },
}

/// A decision held until the matching creation event opens its saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkedDecision {
    correlation_key: CorrelationKey,
    decision: Decision,
    parked_at: DateTime<Utc>,
    #[serde(skip)]
    version: Version,
}

impl ParkedDecision {
    pub fn new(correlation_key: CorrelationKey, decision: Decision, now: DateTime<Utc>) -> Self {
        Self {
            correlation_key,
            decision,
            parked_at: now,
            version: Version::initial(),
        }
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.correlation_key
    }

    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    pub fn parked_at(&self) -> DateTime<Utc> {
        self.parked_at
    }
}

impl Document for ParkedDecision {
    const COLLECTION: &'static str = "parked_decisions";

    fn key(&self) -> String {
        self.correlation_key.to_string()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.parked_at
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}
