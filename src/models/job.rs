use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::services::fingerprint::FingerprintKey;

/// Status of a transcription attempt.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Pending and processing attempts still own their fingerprint.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

/// Identifier of a single attempt. A new one is minted on every reclaim or forced restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque pointer to a stored transcription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(String);

impl ResultRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal report from the worker for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(ResultRef),
    Failed { reason: String },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed(_) => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// The single record kept per fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub fingerprint: FingerprintKey,
    pub job_id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result_ref: Option<ResultRef>,
    pub error: Option<String>,
    pub attempt_count: i32,
}

impl JobRecord {
    /// Start a new `processing` attempt, superseding `previous` if there is one.
    pub fn new_attempt(
        fingerprint: FingerprintKey,
        previous: Option<&JobRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            job_id: JobId::new(),
            status: JobStatus::Processing,
            created_at: previous.map_or(now, |p| p.created_at),
            updated_at: now,
            result_ref: None,
            error: None,
            attempt_count: previous.map_or(1, |p| p.attempt_count + 1),
        }
    }

    /// Apply a worker outcome. Callers must have checked the attempt is still in flight.
    pub fn apply(&mut self, outcome: JobOutcome, at: DateTime<Utc>) {
        self.status = outcome.status();
        self.updated_at = at;
        match outcome {
            JobOutcome::Completed(result_ref) => {
                self.result_ref = Some(result_ref);
                self.error = None;
            }
            JobOutcome::Failed { reason } => {
                self.result_ref = None;
                self.error = Some(reason);
            }
        }
    }
}
