use axum::extract::{Multipart, State};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::input::{MediaSource, TranscriptionInput};
use crate::models::transcription::{TranscribeResponse, TranscriptionRequest};
use crate::services::auth::CallerIdentity;

/// POST /api/transcribe: transcribe media reachable by URL.
#[tracing::instrument(skip_all, fields(user_id = %caller.user_id))]
pub async fn transcribe_from_url(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(req): Json<TranscriptionRequest>,
) -> Result<Json<TranscribeResponse>, ApiError> {
    req.validate()
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let input = TranscriptionInput {
        source: MediaSource::Url(req.video_url),
        title: req.title,
        meeting_type: req.meeting_type,
        participants: req.participants.unwrap_or_default(),
        submitted_by: Some(caller.user_id),
    };

    let decision = state.admission.admit(&input, req.force).await?;
    Ok(Json(decision.into()))
}

/// POST /api/transcribe/upload: transcribe an uploaded recording (multipart field `file`).
#[tracing::instrument(skip_all, fields(user_id = %caller.user_id))]
pub async fn transcribe_upload(
    State(state): State<AppState>,
    caller: CallerIdentity,
    mut multipart: Multipart,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let mut upload: Option<MediaSource> = None;
    let mut title = None;
    let mut meeting_type = None;
    let mut force = false;

    let bad_form = |e: axum::extract::multipart::MultipartError| ApiError::InvalidInput(e.to_string());

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad_form)?;
                upload = Some(MediaSource::Upload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("title") => title = Some(field.text().await.map_err(bad_form)?),
            Some("meeting_type") => meeting_type = Some(field.text().await.map_err(bad_form)?),
            Some("force") => force = parse_flag(&field.text().await.map_err(bad_form)?),
            _ => {}
        }
    }

    let source =
        upload.ok_or_else(|| ApiError::InvalidInput("missing multipart field `file`".into()))?;

    let input = TranscriptionInput {
        source,
        title: title.filter(|t: &String| !t.trim().is_empty()),
        meeting_type,
        participants: Vec::new(),
        submitted_by: Some(caller.user_id),
    };

    let decision = state.admission.admit(&input, force).await?;
    Ok(Json(decision.into()))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
