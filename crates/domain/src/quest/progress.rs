//! Per-player quest progress.

use chrono::{DateTime, Utc};
use common::{EventId, QuestId, SubjectId};
use serde::{Deserialize, Serialize};
use store::{Document, Version};

/// Lifecycle of a player's progress on one quest.
///
/// ```text
/// NotStarted ──► InProgress ──► Completed ──► Claimed
///      └──────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QuestStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    /// Reward handed out. Set outside this crate.
    Claimed,
}

impl QuestStatus {
    /// Returns true once progress can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuestStatus::Completed | QuestStatus::Claimed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::NotStarted => "NotStarted",
            QuestStatus::InProgress => "InProgress",
            QuestStatus::Completed => "Completed",
            QuestStatus::Claimed => "Claimed",
        }
    }
}

impl std::fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a progress update did to an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressChange {
    /// The count moved but the target is not reached yet.
    Advanced { progress_count: u32 },
    /// The count reached the target; the quest is now Completed.
    Completed { progress_count: u32 },
    /// The quest was already Completed or Claimed.
    Clamped,
    /// This event was the last one applied to the aggregate.
    AlreadyApplied,
}

impl ProgressChange {
    /// Returns true if the aggregate was modified and must be saved.
    pub fn is_modified(&self) -> bool {
        matches!(
            self,
            ProgressChange::Advanced { .. } | ProgressChange::Completed { .. }
        )
    }
}

/// A subject's progress on one quest, keyed by `(subject_id, quest_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressAggregate {
    subject_id: SubjectId,
    quest_id: QuestId,
    status: QuestStatus,
    progress_count: u32,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    last_event_id: Option<EventId>,
    #[serde(skip)]
    version: Version,
}

impl ProgressAggregate {
    /// Creates untouched progress for a subject on a quest.
    pub fn new(subject_id: SubjectId, quest_id: QuestId, now: DateTime<Utc>) -> Self {
        Self {
            subject_id,
            quest_id,
            status: QuestStatus::NotStarted,
            progress_count: 0,
            completed_at: None,
            updated_at: now,
            last_event_id: None,
            version: Version::initial(),
        }
    }

    /// Storage key of the aggregate for a subject and quest.
    pub fn key_for(subject_id: SubjectId, quest_id: QuestId) -> String {
        format!("{subject_id}/{quest_id}")
    }

    /// Key prefix shared by all aggregates of one subject.
    pub fn key_prefix_for(subject_id: SubjectId) -> String {
        format!("{subject_id}/")
    }

    /// Applies the progress rule.
    ///
    /// Terminal aggregates are left untouched. Otherwise the count grows by
    /// `amount`, and reaching `target_count` completes the quest.
    pub fn update_progress(
        &mut self,
        amount: u32,
        target_count: u32,
        now: DateTime<Utc>,
    ) -> ProgressChange {
        if self.status.is_terminal() {
            return ProgressChange::Clamped;
        }

        self.progress_count = self.progress_count.saturating_add(amount);
        self.updated_at = now;

        if self.progress_count >= target_count {
            self.status = QuestStatus::Completed;
            self.completed_at = Some(now);
            ProgressChange::Completed {
                progress_count: self.progress_count,
            }
        } else {
            self.status = QuestStatus::InProgress;
            ProgressChange::Advanced {
                progress_count: self.progress_count,
            }
        }
    }

    /// Applies the progress rule on behalf of a specific event.
    ///
    /// The event that was applied last is skipped, so retrying an event after
    /// a partial failure leaves already-updated aggregates alone.
    pub fn apply_event(
        &mut self,
        event_id: EventId,
        amount: u32,
        target_count: u32,
        now: DateTime<Utc>,
    ) -> ProgressChange {
        if self.last_event_id == Some(event_id) {
            return ProgressChange::AlreadyApplied;
        }
        let change = self.update_progress(amount, target_count, now);
        if change.is_modified() {
            self.last_event_id = Some(event_id);
        }
        change
    }
}

// Query methods
impl ProgressAggregate {
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn quest_id(&self) -> QuestId {
        self.quest_id
    }

    pub fn status(&self) -> QuestStatus {
        self.status
    }

    pub fn progress_count(&self) -> u32 {
        self.progress_count
    }

    /// When the quest was completed, if it has been.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn last_event_id(&self) -> Option<EventId> {
        self.last_event_id
    }
}

impl Document for ProgressAggregate {
    const COLLECTION: &'static str = "progress";

    fn key(&self) -> String {
        Self::key_for(self.subject_id, self.quest_id)
    }

    fn tag(&self) -> Option<String> {
        Some(self.status.as_str().to_string())
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
