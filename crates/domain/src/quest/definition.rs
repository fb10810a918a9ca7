//! Quest catalog entries.

use chrono::{DateTime, Utc};
use common::QuestId;
use serde::{Deserialize, Serialize};

/// Category of activity a quest counts (e.g. `DUNGEON_COMPLETION`).
///
/// Completion events carry the same value, which is how events are matched
/// to the quests they advance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestType(String);

impl QuestType {
    /// Quests advanced by finishing a dungeon run.
    pub const DUNGEON_COMPLETION: &'static str = "DUNGEON_COMPLETION";

    /// Creates a quest type from its wire name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The dungeon-completion quest type.
    pub fn dungeon_completion() -> Self {
        Self(Self::DUNGEON_COMPLETION.to_string())
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QuestType {
    fn default() -> Self {
        Self::dungeon_completion()
    }
}

impl std::fmt::Display for QuestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A quest players can make progress on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestDefinition {
    pub id: QuestId,
    /// Short stable code (e.g. `"DUNGEON_3"`).
    pub code: String,
    pub title: String,
    pub description: String,
    pub quest_type: QuestType,
    /// Number of matching events needed to complete the quest.
    pub target_count: u32,
    pub is_active: bool,
    /// Quest does not count events before this instant.
    pub start_at: Option<DateTime<Utc>>,
    /// Quest does not count events after this instant.
    pub end_at: Option<DateTime<Utc>>,
    pub reward: String,
}

impl QuestDefinition {
    /// Creates an active quest with no time window.
    pub fn new(code: impl Into<String>, quest_type: QuestType, target_count: u32) -> Self {
        let code = code.into();
        Self {
            id: QuestId::new(),
            title: code.clone(),
            code,
            description: String::new(),
            quest_type,
            target_count,
            is_active: true,
            start_at: None,
            end_at: None,
            reward: String::new(),
        }
    }

    /// Sets the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the reward label.
    pub fn with_reward(mut self, reward: impl Into<String>) -> Self {
        self.reward = reward.into();
        self
    }

    /// Restricts the quest to a time window. Either bound may be open.
    pub fn with_window(
        mut self,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_at = start_at;
        self.end_at = end_at;
        self
    }

    /// Marks the quest as inactive.
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Returns true if the quest counts events that happened at `at`.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(start) = self.start_at
            && at < start
        {
            return false;
        }
        if let Some(end) = self.end_at
            && at > end
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_quest_is_active_without_window() {
        let quest = QuestDefinition::new("DUNGEON_3", QuestType::dungeon_completion(), 3);
        assert!(quest.is_active_at(Utc::now()));
        assert_eq!(quest.title, "DUNGEON_3");
    }

    #[test]
    fn inactive_quest_never_counts() {
        let quest =
            QuestDefinition::new("OLD", QuestType::dungeon_completion(), 1).deactivated();
        assert!(!quest.is_active_at(Utc::now()));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let start = Utc::now();
        let end = start + Duration::days(7);
        let quest = QuestDefinition::new("WEEKLY", QuestType::dungeon_completion(), 5)
            .with_window(Some(start), Some(end));

        assert!(!quest.is_active_at(start - Duration::seconds(1)));
        assert!(quest.is_active_at(start));
        assert!(quest.is_active_at(end));
        assert!(!quest.is_active_at(end + Duration::seconds(1)));
    }

    #[test]
    fn quest_type_wire_name() {
        let json = serde_json::to_string(&QuestType::dungeon_completion()).unwrap();
        assert_eq!(json, "\"DUNGEON_COMPLETION\"");
    }
}
