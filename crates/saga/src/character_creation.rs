//! Character creation saga constants.

/// The saga type identifier for character creation.
pub const SAGA_TYPE: &str = "CreateCharacter";

/// Failure reason recorded when no decision arrived in time.
pub const TIMEOUT_REASON: &str = "timed out awaiting decision";

/// Attempts at writing one transition before giving up on a contended instance.
pub const MAX_WRITE_ATTEMPTS: usize = 3;
