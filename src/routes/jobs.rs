use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::transcriptions;
use crate::error::ApiError;
use crate::models::job::JobId;
use crate::models::transcription::{JobStatusResponse, Transcription};
use crate::services::auth::CallerIdentity;

/// GET /api/jobs/{job_id}: current state of an attempt.
///
/// Superseded attempts are not addressable; callers should follow the job id
/// returned by their latest submission.
pub async fn get_job(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = JobId::from_uuid(job_id);
    let record = state
        .admission
        .store()
        .get_by_job_id(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;

    Ok(Json(record.into()))
}

/// GET /api/transcriptions/{id}
pub async fn get_transcription(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<Transcription>, ApiError> {
    let transcription = transcriptions::get_transcription(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("transcription {id} not found")))?;

    Ok(Json(transcription))
}
