//! Final artifact retrieval.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};
use uuid::Uuid;

use jimaku_core::{BlobStorePort, EdgeKind, TaskStatus, TaskStorePort, TaskType};

use crate::error::HttpError;
use crate::state::AppState;

/// `GET /api/v1/subtitle/{id}/content` - the enriched subtitle JSON.
///
/// Accepts the enrich task id or the root id (resolved through the
/// enrich edge). A pending pipeline answers 200 with an empty array so
/// clients can poll; a failed one answers 400 with the error.
pub async fn content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, HttpError> {
    let tasks = &state.services.tasks;

    let mut task = tasks
        .get(id)
        .await
        .map_err(HttpError::from)?
        .ok_or_else(|| HttpError::NotFound(format!("task not found: {id}")))?;

    // A root id resolves to its enrich child when one exists.
    if task.task_type == TaskType::Root {
        if let Some(enrich_id) = tasks.get_edge(id, EdgeKind::Enrich).await.map_err(HttpError::from)?
        {
            if let Some(enrich) = tasks.get(enrich_id).await.map_err(HttpError::from)? {
                task = enrich;
            }
        }
    }

    match task.status {
        TaskStatus::Failed | TaskStatus::Cancelled => {
            let error = task.error.unwrap_or_else(|| "task failed".to_string());
            Err(HttpError::BadRequest(format!("task failed: {error}")))
        }
        TaskStatus::Completed => {
            let output_ref = task
                .output_ref
                .ok_or_else(|| HttpError::NotFound("no output artifact recorded".to_string()))?;
            if !state
                .services
                .blob
                .exists(&output_ref)
                .await
                .map_err(HttpError::from)?
            {
                return Err(HttpError::NotFound(format!("artifact missing: {output_ref}")));
            }

            let bytes = state
                .services
                .blob
                .get_bytes(&output_ref)
                .await
                .map_err(HttpError::from)?;
            let content: Value = serde_json::from_slice(&bytes)
                .map_err(|e| HttpError::Internal(format!("corrupt artifact: {e}")))?;

            Ok(Json(json!({ "task_id": id, "content": content })))
        }
        // Pending/Running: polling model, empty content.
        _ => Ok(Json(json!({ "task_id": id, "content": [] }))),
    }
}
