//! Domain error types.

use thiserror::Error;

/// Errors raised while decoding bus messages.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The envelope names a message type this build does not route.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The envelope carries an unsupported schema version.
    #[error("Unsupported event version: {0}")]
    UnsupportedVersion(String),

    /// The payload does not match the shape of its message type.
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
