use chrono::{DateTime, Utc};

use crate::models::job::{JobId, JobOutcome, JobRecord};
use crate::services::job_store::{JobStore, StoreError};

/// What happened to a worker's terminal report.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Applied(JobRecord),
    /// The attempt had been superseded or already finished; nothing was written.
    Discarded,
}

/// Record a worker outcome, swallowing stale writes.
///
/// A stale write means a reclaim or forced restart took the fingerprint while
/// this attempt was running. Its result is orphaned and never shown to callers.
pub async fn report_outcome(
    store: &dyn JobStore,
    job_id: JobId,
    outcome: JobOutcome,
    at: DateTime<Utc>,
) -> Result<Report, StoreError> {
    let status = outcome.status();
    match store.update_status(job_id, outcome, at).await {
        Ok(record) => {
            tracing::info!(job_id = %job_id, status = %status, attempt = record.attempt_count, "Recorded job outcome");
            Ok(Report::Applied(record))
        }
        Err(StoreError::StaleWrite(_)) => {
            metrics::counter!("stale_writes_discarded_total").increment(1);
            tracing::warn!(job_id = %job_id, status = %status, "Discarding outcome of superseded attempt");
            Ok(Report::Discarded)
        }
        Err(e) => Err(e),
    }
}
