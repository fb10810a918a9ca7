//! Messages exchanged over the bus and their wire envelope.

use chrono::{DateTime, Utc};
use common::{CorrelationKey, EventId, SubjectId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, Result};
use crate::quest::QuestType;

/// A record was created locally and now awaits a remote decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCreated {
    #[serde(alias = "character_id")]
    pub subject_id: CorrelationKey,
    #[serde(default, alias = "user_id")]
    pub owner_id: Option<String>,
}

/// The remote service accepted the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfirmed {
    #[serde(alias = "character_id")]
    pub subject_id: CorrelationKey,
    #[serde(default)]
    pub message: String,
}

/// The remote service rejected the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRejected {
    #[serde(alias = "character_id")]
    pub subject_id: CorrelationKey,
    #[serde(default)]
    pub reason: String,
}

/// A player finished an activity that may advance quests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotified {
    pub event_id: EventId,
    #[serde(alias = "player_id")]
    pub subject_id: SubjectId,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub category: QuestType,
}

impl CompletionNotified {
    /// Creates a dungeon-completion notification with a fresh event id.
    pub fn dungeon_completed(subject_id: SubjectId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: EventId::new(),
            subject_id,
            occurred_at,
            category: QuestType::dungeon_completion(),
        }
    }
}

/// Any message the worker knows how to route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Created(EntityCreated),
    Confirmed(EntityConfirmed),
    Rejected(EntityRejected),
    Completion(CompletionNotified),
}

impl BusMessage {
    pub const CHARACTER_CREATED: &'static str = "CharacterCreated";
    pub const CHARACTER_CONFIRMED: &'static str = "CharacterCreationConfirmed";
    pub const CHARACTER_REJECTED: &'static str = "CharacterCreationFailed";
    pub const DUNGEON_COMPLETED: &'static str = "DungeonCompleted";

    /// Wire name of the message type.
    pub fn event_type(&self) -> &'static str {
        match self {
            BusMessage::Created(_) => Self::CHARACTER_CREATED,
            BusMessage::Confirmed(_) => Self::CHARACTER_CONFIRMED,
            BusMessage::Rejected(_) => Self::CHARACTER_REJECTED,
            BusMessage::Completion(_) => Self::DUNGEON_COMPLETED,
        }
    }

    fn data(&self) -> Result<Value> {
        let value = match self {
            BusMessage::Created(m) => serde_json::to_value(m)?,
            BusMessage::Confirmed(m) => serde_json::to_value(m)?,
            BusMessage::Rejected(m) => serde_json::to_value(m)?,
            BusMessage::Completion(m) => serde_json::to_value(m)?,
        };
        Ok(value)
    }
}

/// JSON envelope every message travels in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub event_id: EventId,
    pub event_version: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl MessageEnvelope {
    /// The only envelope version this build understands.
    pub const CURRENT_VERSION: &'static str = "1";

    /// Wraps a message in a fresh envelope.
    pub fn wrap(message: &BusMessage, timestamp: DateTime<Utc>) -> Result<Self> {
        let event_id = match message {
            BusMessage::Completion(m) => m.event_id,
            _ => EventId::new(),
        };
        Ok(Self {
            event_id,
            event_version: Self::CURRENT_VERSION.to_string(),
            event_type: message.event_type().to_string(),
            timestamp,
            data: message.data()?,
        })
    }

    /// Decodes the payload according to `event_type`.
    ///
    /// Completion payloads without their own `event_id` inherit the
    /// envelope's, which keeps the idempotency key stable across redeliveries.
    pub fn decode(&self) -> Result<BusMessage> {
        if self.event_version != Self::CURRENT_VERSION {
            return Err(DomainError::UnsupportedVersion(self.event_version.clone()));
        }

        let message = match self.event_type.as_str() {
            BusMessage::CHARACTER_CREATED => {
                BusMessage::Created(serde_json::from_value(self.data.clone())?)
            }
            BusMessage::CHARACTER_CONFIRMED => {
                BusMessage::Confirmed(serde_json::from_value(self.data.clone())?)
            }
            BusMessage::CHARACTER_REJECTED => {
                BusMessage::Rejected(serde_json::from_value(self.data.clone())?)
            }
            BusMessage::DUNGEON_COMPLETED => {
                let mut data = self.data.clone();
                if let Value::Object(map) = &mut data {
                    map.entry("event_id")
                        .or_insert_with(|| Value::String(self.event_id.to_string()));
                    map.entry("occurred_at")
                        .or_insert_with(|| Value::String(self.timestamp.to_rfc3339()));
                }
                BusMessage::Completion(serde_json::from_value(data)?)
            }
            other => return Err(DomainError::UnknownEventType(other.to_string())),
        };
        Ok(message)
    }
}
