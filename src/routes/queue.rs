use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::CancelResponse;
use crate::routes::error::ApiError;
use crate::services::queue::QueueStatus;

pub async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.manager.queue_status().await)
}

/// POST /api/v1/queue/clear: cancel every job that has not started.
pub async fn clear_queue(State(state): State<AppState>) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state.manager.cancel_all_pending().await?;
    Ok(Json(CancelResponse { cancelled }))
}

pub async fn pause_queue(State(state): State<AppState>) -> Json<QueueStatus> {
    state.manager.pause();
    Json(state.manager.queue_status().await)
}

pub async fn resume_queue(State(state): State<AppState>) -> Json<QueueStatus> {
    state.manager.resume().await;
    Json(state.manager.queue_status().await)
}
