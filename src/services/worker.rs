//! One step of the worker loop: take a queued attempt, run it, report it, release it.
//!
//! The queue payload is only released once the outcome is recorded or the
//! report has been retried and abandoned. When the store cannot even be read,
//! the payload goes back on the pending list instead of being stranded.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::models::job::{JobId, JobOutcome, ResultRef};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::pipeline::PipelineError;
use crate::services::queue::{JobQueue, QueueError, QueuedJob};
use crate::services::reporting::{self, Report};

const REPORT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Queue operations the worker relies on.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError>;
    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError>;
    async fn requeue(&self, job: &QueuedJob) -> Result<(), QueueError>;
    async fn queue_depth(&self) -> Result<u64, QueueError>;
}

#[async_trait]
impl WorkQueue for JobQueue {
    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        JobQueue::dequeue(self).await
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        JobQueue::complete(self, job).await
    }

    async fn requeue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        JobQueue::requeue(self, job).await
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        JobQueue::queue_depth(self).await
    }
}

/// The long-running part of an attempt: media in, saved transcription reference out.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &QueuedJob) -> Result<ResultRef, PipelineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("job store unavailable, job {job_id} returned to the queue: {source}")]
    Requeued {
        job_id: JobId,
        #[source]
        source: StoreError,
    },

    #[error("could not record the outcome of job {job_id}: {source}")]
    Report {
        job_id: JobId,
        #[source]
        source: StoreError,
    },
}

pub struct Worker {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    runner: Arc<dyn JobRunner>,
    job_timeout: Duration,
    retry_delay: Duration,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        runner: Arc<dyn JobRunner>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            runner,
            job_timeout,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Base delay between report retries; grows linearly with each attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Process the next job from the queue.
    /// Returns Ok(true) if a job was taken, Ok(false) if the queue was empty.
    pub async fn process_next_job(&self) -> Result<bool, WorkerError> {
        let Some(job) = self.queue.dequeue().await? else {
            return Ok(false);
        };

        if let Ok(depth) = self.queue.queue_depth().await {
            metrics::gauge!("transcription_queue_depth").set(depth as f64);
        }

        // A reclaim or forced restart may have replaced this attempt while it sat in the queue.
        let current = match self.store.get_by_job_id(job.job_id).await {
            Ok(current) => current,
            Err(source) => {
                tracing::warn!(job_id = %job.job_id, error = %source, "Job store unavailable, returning job to the queue");
                self.queue.requeue(&job).await?;
                return Err(WorkerError::Requeued {
                    job_id: job.job_id,
                    source,
                });
            }
        };
        if !current.is_some_and(|record| record.status.is_in_flight()) {
            tracing::info!(job_id = %job.job_id, "Skipping superseded or finished attempt");
            self.queue.complete(&job).await?;
            return Ok(true);
        }

        tracing::info!(
            job_id = %job.job_id,
            fingerprint = %job.fingerprint,
            display_name = %job.display_name,
            "Processing transcription job"
        );

        let start = std::time::Instant::now();
        let outcome = self.run_with_deadline(&job).await;
        let elapsed = start.elapsed();
        metrics::histogram!("transcription_processing_seconds").record(elapsed.as_secs_f64());

        let failed = matches!(outcome, JobOutcome::Failed { .. });
        let report = self.report_with_retry(job.job_id, outcome).await;

        // Release the payload either way: the record now holds the outcome, or
        // it stays in flight and the staleness policy will hand it to a new attempt.
        self.queue.complete(&job).await?;

        if let Report::Applied(record) = report? {
            tracing::info!(
                job_id = %job.job_id,
                status = %record.status,
                duration_ms = elapsed.as_millis() as u64,
                "Job finished"
            );
        }
        if failed {
            metrics::counter!("transcription_jobs_failed").increment(1);
        } else {
            metrics::counter!("transcription_jobs_completed").increment(1);
        }

        Ok(true)
    }

    async fn run_with_deadline(&self, job: &QueuedJob) -> JobOutcome {
        match tokio::time::timeout(self.job_timeout, self.runner.run(job)).await {
            Ok(Ok(result_ref)) => JobOutcome::Completed(result_ref),
            Ok(Err(e)) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Job processing failed");
                JobOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                tracing::error!(
                    job_id = %job.job_id,
                    deadline_secs = self.job_timeout.as_secs(),
                    "Job exceeded its processing deadline"
                );
                JobOutcome::Failed {
                    reason: format!(
                        "processing exceeded the {}s deadline",
                        self.job_timeout.as_secs()
                    ),
                }
            }
        }
    }

    async fn report_with_retry(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
    ) -> Result<Report, WorkerError> {
        let mut attempt = 1;
        loop {
            match reporting::report_outcome(
                self.store.as_ref(),
                job_id,
                outcome.clone(),
                chrono::Utc::now(),
            )
            .await
            {
                Ok(report) => return Ok(report),
                Err(source) if attempt >= REPORT_ATTEMPTS => {
                    tracing::error!(job_id = %job_id, error = %source, "Giving up on recording job outcome");
                    return Err(WorkerError::Report { job_id, source });
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "Failed to record job outcome, retrying");
                    sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}
