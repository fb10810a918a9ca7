//! Worker error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use progress::ConsumerError;
use saga::SagaError;
use store::StoreError;
use thiserror::Error;

/// Errors raised while handling a delivered message or a query.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The envelope could not be parsed or decoded.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Unknown event type or unsupported envelope version.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// The handling task panicked or was cancelled.
    #[error("Message task failed: {0}")]
    Task(String),
}

impl WorkerError {
    /// Returns true if the sender should redeliver the message.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Saga(e) => e.is_transient(),
            WorkerError::Consumer(e) => e.is_transient(),
            WorkerError::Store(e) => e.is_transient(),
            WorkerError::Task(_) => true,
            WorkerError::Malformed(_) | WorkerError::Domain(_) | WorkerError::NotFound(_) => false,
        }
    }

    /// Returns true for inconsistencies that need an operator.
    pub fn is_critical(&self) -> bool {
        matches!(self, WorkerError::Saga(e) if e.is_critical())
    }

    fn status(&self) -> StatusCode {
        match self {
            WorkerError::Malformed(_) | WorkerError::Domain(_) => StatusCode::BAD_REQUEST,
            WorkerError::NotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_critical() => StatusCode::INTERNAL_SERVER_ERROR,
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        let body = if self.is_critical() {
            tracing::error!(
                error = %message,
                severity = "critical",
                "message left an inconsistency"
            );
            serde_json::json!({ "error": message, "severity": "critical" })
        } else {
            if status.is_server_error() {
                tracing::warn!(
                    error = %message,
                    status = status.as_u16(),
                    "message handling failed"
                );
            }
            serde_json::json!({ "error": message })
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;
