use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{effective_limit, JobListResponse, ListJobsQuery, SubmitRequest, SubmitResponse};
use crate::models::job::{Job, SubmitOutcome};
use crate::routes::error::ApiError;

/// POST /api/v1/jobs: admit a product link.
///
/// 202 when a job is created, 200 when an active job or a fresh cache entry
/// already covers the link, 503 when the queue is full.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    payload
        .validate()
        .map_err(|report| ApiError::Validation(report.to_string()))?;

    let url = payload.url.trim();
    match state.manager.submit(url).await? {
        SubmitOutcome::Created(job) => Ok((StatusCode::ACCEPTED, Json(SubmitResponse::created(&job)))),
        SubmitOutcome::Duplicate(job) => Ok((StatusCode::OK, Json(SubmitResponse::duplicate(&job)))),
        SubmitOutcome::Cached(entry) => Ok((StatusCode::OK, Json(SubmitResponse::cached(&entry)))),
        SubmitOutcome::CapacityExceeded { max_queue_size } => {
            Err(ApiError::CapacityExceeded(max_queue_size))
        }
    }
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state
        .manager
        .list_jobs(query.status, effective_limit(query.limit))
        .await?;
    Ok(Json(JobListResponse { jobs }))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    state
        .manager
        .job(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))
}
