use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use mg_core::{GenerationDraft, JobId};
use tracing::info;

use crate::backend::schemas::{JobCreateResponse, JobStatusResponse};
use crate::backend::state::AppState;
use crate::error::ApiError;

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerationDraft>, JsonRejection>,
) -> Result<Json<JobCreateResponse>, ApiError> {
    let Json(draft) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let task_id = state.service.submit(draft).await?;
    info!(job_id = %task_id, "accepted generation request");

    Ok(Json(JobCreateResponse::accepted(task_id)))
}

pub async fn get_job_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let id: JobId = task_id
        .parse()
        .map_err(|_| ApiError::not_found(format!("task {task_id} not found")))?;

    let job = state.service.status(id).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}
