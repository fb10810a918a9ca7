//! Quest progress queries.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SubjectId;
use serde::Serialize;

use crate::error::WorkerError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QuestProgressResponse {
    pub quest_id: String,
    pub code: Option<String>,
    pub title: Option<String>,
    pub status: String,
    pub progress_count: u32,
    pub target_count: Option<u32>,
    pub completed_at: Option<String>,
    pub reward: Option<String>,
}

/// GET /subjects/{id}/quests: lists the subject's quest progress.
#[tracing::instrument(skip(state))]
pub async fn list_for_subject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<QuestProgressResponse>>, WorkerError> {
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| WorkerError::Malformed(format!("Invalid subject id: {e}")))?;

    let quests = state
        .queries
        .for_subject(SubjectId::from_uuid(uuid))
        .await?;

    let responses = quests
        .into_iter()
        .map(|q| {
            let definition = q.definition.as_ref();
            QuestProgressResponse {
                quest_id: q.progress.quest_id().to_string(),
                code: definition.map(|d| d.code.clone()),
                title: definition.map(|d| d.title.clone()),
                status: q.progress.status().to_string(),
                progress_count: q.progress.progress_count(),
                target_count: definition.map(|d| d.target_count),
                completed_at: q.progress.completed_at().map(|t| t.to_rfc3339()),
                reward: definition.map(|d| d.reward.clone()),
            }
        })
        .collect();

    Ok(Json(responses))
}
