//! Saga inspection endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::CorrelationKey;
use serde::Serialize;
use store::Document;

use crate::error::WorkerError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SagaStatusResponse {
    pub correlation_key: String,
    pub state: String,
    pub owner_id: Option<String>,
    pub confirmation_message: Option<String>,
    pub failure_reason: Option<String>,
    pub compensation: Option<saga::CompensationOutcome>,
    pub created_at: String,
    pub updated_at: String,
}

/// GET /sagas/{key}: returns the saga for a correlation key.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<SagaStatusResponse>, WorkerError> {
    let key = CorrelationKey::from(key);
    let saga = state
        .coordinator
        .get_saga(&key)
        .await?
        .ok_or_else(|| WorkerError::NotFound(format!("Saga {key} not found")))?;

    Ok(Json(SagaStatusResponse {
        correlation_key: key.to_string(),
        state: saga.state().to_string(),
        owner_id: saga.owner_id().map(String::from),
        confirmation_message: saga.confirmation_message().map(String::from),
        failure_reason: saga.failure_reason().map(String::from),
        compensation: saga.compensation(),
        created_at: saga.created_at().to_rfc3339(),
        updated_at: saga.updated_at().to_rfc3339(),
    }))
}
