//! Checkpoint endpoint handlers.
//!
//! The lookup endpoints mirror the engine's best-effort contract: a
//! missing checkpoint is `{"success": false}`, not an HTTP error.

use crate::error::ApiResult;
use crate::routes::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use checkpoint::CheckpointStatus;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Query string of `GET /research/checkpoints`.
#[derive(Debug, Deserialize)]
pub struct CheckpointListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /research/checkpoint/:session_id` — checkpoint metadata.
pub async fn get_checkpoint(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let Some(store) = app.engine.checkpoint_store() else {
        return Ok(Json(json!({"success": false, "message": "checkpointing disabled"})));
    };

    match store.get_info(&session_id).await? {
        Some(info) => Ok(Json(json!({"success": true, "checkpoint": info}))),
        None => Ok(Json(json!({"success": false, "message": "checkpoint not found"}))),
    }
}

/// `GET /research/checkpoints?status=&limit=` — list checkpoints.
pub async fn list_checkpoints(
    State(app): State<AppState>,
    Query(query): Query<CheckpointListQuery>,
) -> ApiResult<Json<Value>> {
    let Some(store) = app.engine.checkpoint_store() else {
        return Ok(Json(json!({"success": false, "checkpoints": []})));
    };

    let status = query.status.as_deref().and_then(CheckpointStatus::parse);
    let limit = query.limit.unwrap_or(20).min(100);
    let checkpoints = store.list(query.user_id.as_deref(), status, limit).await?;

    Ok(Json(json!({"success": true, "checkpoints": checkpoints})))
}

/// `DELETE /research/checkpoint/:session_id` — delete a checkpoint.
/// Deleting a non-existent checkpoint reports `success: false`.
pub async fn delete_checkpoint(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let Some(store) = app.engine.checkpoint_store() else {
        return Ok(Json(json!({"success": false, "message": "checkpointing disabled"})));
    };

    let deleted = store.delete(&session_id).await?;
    if deleted {
        info!(%session_id, "checkpoint deleted");
    }
    Ok(Json(json!({"success": deleted})))
}
