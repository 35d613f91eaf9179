use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::instrument;

use crate::models::job::{JobId, JobOutcome, JobRecord, JobStatus, ResultRef};
use crate::services::fingerprint::FingerprintKey;
use crate::services::job_store::{Expected, JobStore, StoreError};

const COLUMNS: &str =
    "fingerprint, job_id, status, attempt_count, result_ref, error, created_at, updated_at";

/// [`JobStore`] backed by the `transcription_jobs` table.
///
/// Conditional writes are single statements whose `WHERE` clause carries the
/// expected state, so Postgres row locking provides the atomicity.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn record_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let fingerprint: String = row.try_get("fingerprint").map_err(unavailable)?;
    let status: String = row.try_get("status").map_err(unavailable)?;
    let result_ref: Option<String> = row.try_get("result_ref").map_err(unavailable)?;

    Ok(JobRecord {
        fingerprint: FingerprintKey::from_hex(fingerprint.trim())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(unavailable)?),
        status: JobStatus::from_str(&status)
            .map_err(|_| StoreError::Corrupt(format!("unknown status `{status}`")))?,
        attempt_count: row.try_get("attempt_count").map_err(unavailable)?,
        result_ref: result_ref.map(ResultRef::new),
        error: row.try_get("error").map_err(unavailable)?,
        created_at: row.try_get("created_at").map_err(unavailable)?,
        updated_at: row.try_get("updated_at").map_err(unavailable)?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    async fn get(&self, fingerprint: &FingerprintKey) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transcription_jobs WHERE fingerprint = $1"
        ))
        .bind(fingerprint.to_hex())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn get_by_job_id(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transcription_jobs WHERE job_id = $1"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(fingerprint = %record.fingerprint, job_id = %record.job_id))]
    async fn create_or_replace(
        &self,
        record: &JobRecord,
        expected: Expected,
    ) -> Result<bool, StoreError> {
        let result = match expected {
            Expected::Absent => {
                sqlx::query(
                    r#"
                    INSERT INTO transcription_jobs
                        (fingerprint, job_id, status, attempt_count, result_ref, error, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (fingerprint) DO NOTHING
                    "#,
                )
                .bind(record.fingerprint.to_hex())
                .bind(record.job_id.as_uuid())
                .bind(record.status.as_str())
                .bind(record.attempt_count)
                .bind(record.result_ref.as_ref().map(ResultRef::as_str))
                .bind(record.error.as_deref())
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(&self.pool)
                .await
            }
            Expected::Current { job_id, status } => {
                sqlx::query(
                    r#"
                    UPDATE transcription_jobs
                    SET job_id = $2,
                        status = $3,
                        attempt_count = $4,
                        result_ref = $5,
                        error = $6,
                        created_at = $7,
                        updated_at = $8
                    WHERE fingerprint = $1
                      AND job_id = $9
                      AND status = $10
                    "#,
                )
                .bind(record.fingerprint.to_hex())
                .bind(record.job_id.as_uuid())
                .bind(record.status.as_str())
                .bind(record.attempt_count)
                .bind(record.result_ref.as_ref().map(ResultRef::as_str))
                .bind(record.error.as_deref())
                .bind(record.created_at)
                .bind(record.updated_at)
                .bind(job_id.as_uuid())
                .bind(status.as_str())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(unavailable)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, outcome), fields(job_id = %job_id, status = %outcome.status()))]
    async fn update_status(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let status = outcome.status();
        let (result_ref, error) = match outcome {
            JobOutcome::Completed(result_ref) => (Some(result_ref.as_str().to_string()), None),
            JobOutcome::Failed { reason } => (None, Some(reason)),
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE transcription_jobs
            SET status = $2,
                result_ref = $3,
                error = $4,
                updated_at = $5
            WHERE job_id = $1
              AND status IN ('pending', 'processing')
            RETURNING {COLUMNS}
            "#
        ))
        .bind(job_id.as_uuid())
        .bind(status.as_str())
        .bind(result_ref)
        .bind(error)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(StoreError::StaleWrite(job_id)),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
