//! Analyze pipeline endpoints: create, poll, stream.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jimaku_core::{ReconciledState, TaskId, TaskStatus};

use crate::error::HttpError;
use crate::sse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeParams {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeCreated {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

/// `POST /api/v1/video/analyze?url=...` - create the root task and
/// start the pipeline.
pub async fn start_analysis(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeParams>,
) -> Result<Json<AnalyzeCreated>, HttpError> {
    let url = params.url.trim();
    if url.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(HttpError::BadRequest(format!("not a media URL: {url:?}")));
    }

    tracing::info!(url, "analyze request received");
    let task_id = state
        .coordinator
        .start(url)
        .await
        .map_err(HttpError::from)?;

    Ok(Json(AnalyzeCreated {
        task_id,
        status: TaskStatus::Pending,
        message: "task created, downloading audio".to_string(),
    }))
}

/// `GET /api/v1/video/analyze/{id}` - reconciled snapshot.
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconciledState>, HttpError> {
    let snapshot = state
        .coordinator
        .snapshot(id)
        .await
        .map_err(HttpError::from)?
        .ok_or_else(|| HttpError::NotFound(format!("task not found: {id}")))?;
    Ok(Json(snapshot))
}

/// `GET /api/v1/video/analyze/{id}/stream` - server-sent status events.
pub async fn stream_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl axum::response::IntoResponse {
    tracing::info!(task_id = %id, "SSE stream opened");
    sse::reconciled_stream(state, id)
}
