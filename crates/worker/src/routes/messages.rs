//! Push-delivery ingress for bus messages.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use domain::MessageEnvelope;
use progress::ConsumeOutcome;
use serde::Serialize;

use crate::dispatcher::Handled;
use crate::error::WorkerError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub event_id: String,
    pub event_type: String,
    pub outcome: &'static str,
    /// Progress aggregates changed by a completion event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<usize>,
}

/// POST /messages: handles one enveloped message.
///
/// Answers 202 once the message is handled, recognised as a duplicate or
/// parked; errors map through [`WorkerError`].
#[tracing::instrument(skip(state, body))]
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<DeliveryResponse>), WorkerError> {
    let envelope: MessageEnvelope =
        serde_json::from_slice(&body).map_err(|e| WorkerError::Malformed(e.to_string()))?;
    let event_id = envelope.event_id.to_string();
    let event_type = envelope.event_type.clone();

    let handled = state.dispatcher.dispatch_spawned(envelope).await?;

    let updated = match handled {
        Handled::Progress(ConsumeOutcome::Applied { updated }) => Some(updated),
        _ => None,
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(DeliveryResponse {
            event_id,
            event_type,
            outcome: handled.outcome(),
            updated,
        }),
    ))
}
