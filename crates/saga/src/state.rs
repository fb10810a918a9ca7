//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a character-creation saga.
///
/// State transitions:
/// ```text
/// Initiated ──┬──► Completed
///             └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// The record exists locally and awaits the remote decision.
    #[default]
    Initiated,

    /// The remote service confirmed the record (terminal state).
    Completed,

    /// The remote service rejected the record and it was compensated (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if a confirmation can be applied.
    pub fn can_complete(&self) -> bool {
        matches!(self, SagaState::Initiated)
    }

    /// Returns true if a rejection can be applied.
    pub fn can_fail(&self) -> bool {
        matches!(self, SagaState::Initiated)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Initiated => "Initiated",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_initiated() {
        assert_eq!(SagaState::default(), SagaState::Initiated);
    }

    #[test]
    fn test_only_initiated_accepts_decisions() {
        assert!(SagaState::Initiated.can_complete());
        assert!(SagaState::Initiated.can_fail());
        for state in [SagaState::Completed, SagaState::Failed] {
            assert!(!state.can_complete());
            assert!(!state.can_fail());
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaState::Initiated.is_terminal());
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Failed.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaState::Initiated.to_string(), "Initiated");
        assert_eq!(SagaState::Completed.to_string(), "Completed");
        assert_eq!(SagaState::Failed.to_string(), "Failed");
    }
}
