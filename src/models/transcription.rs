use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::job::{JobId, JobRecord, JobStatus, ResultRef};
use crate::services::admission::AdmissionDecision;
use crate::services::fingerprint::FingerprintKey;

const PLACEHOLDER: &str = "N/A";

/// Request to transcribe media reachable by URL.
#[derive(Debug, Deserialize, Validate)]
pub struct TranscriptionRequest {
    #[garde(length(min = 1, max = 2048))]
    pub video_url: String,

    #[garde(length(max = 300))]
    pub title: Option<String>,

    #[garde(length(max = 100))]
    pub meeting_type: Option<String>,

    #[garde(skip)]
    pub participants: Option<Vec<String>>,

    /// Start a new attempt even if a cached or in-flight one exists.
    #[serde(default)]
    #[garde(skip)]
    pub force: bool,
}

/// Response to both submission endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub job_id: JobId,
    pub decision: String,
    pub status: JobStatus,
    pub result_ref: Option<ResultRef>,
    pub message: String,
}

/// Every non-cached decision leaves the record in flight, and admission only
/// ever writes `processing`, so that is the status reported for all of them.
/// `decision` is what tells a fresh attempt from a joined one.
impl From<AdmissionDecision> for TranscribeResponse {
    fn from(decision: AdmissionDecision) -> Self {
        let (status, result_ref, message) = match &decision {
            AdmissionDecision::Cached { result_ref, .. } => (
                JobStatus::Completed,
                Some(result_ref.clone()),
                "Transcription already available",
            ),
            AdmissionDecision::Admitted { fresh: true, .. } => {
                (JobStatus::Processing, None, "Transcription queued")
            }
            AdmissionDecision::Admitted { fresh: false, .. } => (
                JobStatus::Processing,
                None,
                "Transcription already in progress",
            ),
            AdmissionDecision::Reclaimed { .. } => (
                JobStatus::Processing,
                None,
                "Previous attempt stalled, transcription restarted",
            ),
            AdmissionDecision::ForcedRestart { .. } => {
                (JobStatus::Processing, None, "Transcription restarted")
            }
        };

        Self {
            job_id: decision.job_id(),
            decision: decision.label().to_string(),
            status,
            result_ref,
            message: message.to_string(),
        }
    }
}

/// Response for querying an attempt.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub fingerprint: FingerprintKey,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub result_ref: Option<ResultRef>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            fingerprint: record.fingerprint,
            status: record.status,
            attempt_count: record.attempt_count,
            result_ref: record.result_ref,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Structured meeting summary produced from a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingSummary {
    pub title: String,
    pub client: String,
    pub project: String,
    pub rito: String,
    pub executive_summary: String,
    pub decisions: Vec<String>,
    pub main_points: Vec<String>,
    pub action_items: Vec<String>,
    pub tags: Vec<String>,
    pub participants: Vec<String>,
}

impl MeetingSummary {
    /// Summary used when the language model gave nothing usable.
    pub fn fallback(display_name: &str) -> Self {
        Self::from_model_output(&Value::Null, display_name)
    }

    /// Build from loosely-shaped model JSON, filling gaps with placeholders.
    pub fn from_model_output(value: &Value, display_name: &str) -> Self {
        Self {
            title: text_field(value, "title").unwrap_or_else(|| format!("Reunião - {display_name}")),
            client: text_field(value, "client").unwrap_or_else(|| PLACEHOLDER.to_string()),
            project: text_field(value, "project").unwrap_or_else(|| PLACEHOLDER.to_string()),
            rito: text_field(value, "rito").unwrap_or_else(|| PLACEHOLDER.to_string()),
            executive_summary: text_field(value, "executive_summary")
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
            decisions: list_field(value, &["decisions"]),
            main_points: list_field(value, &["main_points"]),
            action_items: list_field(value, &["action_items"]),
            tags: list_field(value, &["tag", "tags"]),
            participants: list_field(value, &["participants"]),
        }
    }
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// First array found under any of `keys`, keeping only string items.
fn list_field(value: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

/// A saved transcription, the target of a completed job's `result_ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub id: i64,
    pub job_id: JobId,
    pub fingerprint: FingerprintKey,
    pub source_url: Option<String>,
    pub file_name: String,
    pub user_id: Option<String>,
    pub meeting_type: Option<String>,
    pub transcript: String,
    pub summary: MeetingSummary,
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a transcription.
#[derive(Debug, Clone)]
pub struct NewTranscription {
    pub job_id: JobId,
    pub fingerprint: FingerprintKey,
    pub source_url: Option<String>,
    pub file_name: String,
    pub user_id: Option<String>,
    pub meeting_type: Option<String>,
    pub transcript: String,
    pub summary: MeetingSummary,
}
