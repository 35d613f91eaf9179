//! Idempotent admission of transcription requests.
//!
//! Each call fingerprints the input, reads the current attempt for that
//! fingerprint and either answers from it or writes a new attempt with a
//! compare-and-swap against what it read. A lost swap means another request
//! changed the record in between; the controller re-reads and decides again,
//! so concurrent requests for a never-seen input converge on one attempt.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use crate::models::input::TranscriptionInput;
use crate::models::job::{JobId, JobOutcome, JobRecord, JobStatus, ResultRef};
use crate::services::clock::Clock;
use crate::services::fingerprint::{self, FingerprintError, FingerprintKey};
use crate::services::job_store::{Expected, JobStore, StoreError};
use crate::services::staleness;

/// Read-decide-write rounds before giving up on a hot fingerprint.
const MAX_CAS_ROUNDS: usize = 8;

/// Result of a successful admission.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    /// A completed attempt already exists for this input.
    Cached { job_id: JobId, result_ref: ResultRef },
    /// `fresh` is true when this call created the attempt, false when it
    /// found one already in flight and not yet stale.
    Admitted { job_id: JobId, fresh: bool },
    /// The previous in-flight attempt went stale and was superseded.
    Reclaimed { job_id: JobId },
    /// Caller asked for a new attempt regardless of existing state.
    ForcedRestart { job_id: JobId },
}

impl AdmissionDecision {
    pub fn job_id(&self) -> JobId {
        match self {
            AdmissionDecision::Cached { job_id, .. }
            | AdmissionDecision::Admitted { job_id, .. }
            | AdmissionDecision::Reclaimed { job_id }
            | AdmissionDecision::ForcedRestart { job_id } => *job_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AdmissionDecision::Cached { .. } => "cached",
            AdmissionDecision::Admitted { fresh: true, .. } => "admitted",
            AdmissionDecision::Admitted { fresh: false, .. } => "in_flight",
            AdmissionDecision::Reclaimed { .. } => "reclaimed",
            AdmissionDecision::ForcedRestart { .. } => "forced_restart",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] FingerprintError),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("fingerprint {0} is being rewritten concurrently, retry later")]
    Contended(FingerprintKey),

    #[error("failed to hand off job {job_id} to the worker: {source}")]
    Dispatch {
        job_id: JobId,
        #[source]
        source: DispatchError,
    },
}

/// Hand-off of a newly created attempt to the transcription worker.
///
/// Implementations must return quickly; the long-running work happens elsewhere.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        job_id: JobId,
        fingerprint: &FingerprintKey,
        input: &TranscriptionInput,
    ) -> Result<(), DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] crate::services::queue::QueueError),

    #[error(transparent)]
    Storage(#[from] crate::services::storage::StorageError),

    #[error(transparent)]
    Encryption(#[from] crate::services::encryption::EncryptionError),
}

/// What one round decided after reading the store.
enum Step {
    Respond(AdmissionDecision),
    Write {
        record: JobRecord,
        expected: Expected,
        decision: AdmissionDecision,
    },
}

pub struct AdmissionController {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            stale_after,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Decide what to do with `input` and, when a new attempt is created, hand it to the worker.
    #[tracing::instrument(skip(self, input), fields(fingerprint))]
    pub async fn admit(
        &self,
        input: &TranscriptionInput,
        force: bool,
    ) -> Result<AdmissionDecision, AdmissionError> {
        let fingerprint = fingerprint::fingerprint(&input.source)?;
        tracing::Span::current().record("fingerprint", tracing::field::display(&fingerprint));

        let mut lost_forced_write = false;

        for round in 0..MAX_CAS_ROUNDS {
            let current = self.store.get(&fingerprint).await?;

            // A forced restart that lost the swap adopts whichever attempt won it.
            if lost_forced_write {
                if let Some(winner) = current.as_ref().filter(|r| r.status.is_in_flight()) {
                    tracing::info!(
                        job_id = %winner.job_id,
                        "Adopting concurrently created attempt for forced restart"
                    );
                    return Ok(self.record_decision(AdmissionDecision::ForcedRestart {
                        job_id: winner.job_id,
                    }));
                }
            }

            match self.plan(fingerprint, current.as_ref(), force) {
                Step::Respond(decision) => return Ok(self.record_decision(decision)),
                Step::Write {
                    record,
                    expected,
                    decision,
                } => {
                    if self.store.create_or_replace(&record, expected).await? {
                        tracing::info!(
                            job_id = %record.job_id,
                            attempt = record.attempt_count,
                            decision = decision.label(),
                            "Created transcription attempt"
                        );
                        self.hand_off(&record, input).await?;
                        return Ok(self.record_decision(decision));
                    }
                    tracing::debug!(round, "Lost admission race, re-reading job record");
                    lost_forced_write = force;
                }
            }
        }

        metrics::counter!("admission_contended_total").increment(1);
        Err(AdmissionError::Contended(fingerprint))
    }

    fn plan(&self, fingerprint: FingerprintKey, current: Option<&JobRecord>, force: bool) -> Step {
        let now = self.clock.now();
        let write = |decision: fn(JobId) -> AdmissionDecision| {
            let record = JobRecord::new_attempt(fingerprint, current, now);
            Step::Write {
                expected: Expected::of(current),
                decision: decision(record.job_id),
                record,
            }
        };

        let Some(existing) = current else {
            return write(|job_id| AdmissionDecision::Admitted {
                job_id,
                fresh: true,
            });
        };

        if force {
            return write(|job_id| AdmissionDecision::ForcedRestart { job_id });
        }

        match existing.status {
            JobStatus::Completed => match &existing.result_ref {
                Some(result_ref) => Step::Respond(AdmissionDecision::Cached {
                    job_id: existing.job_id,
                    result_ref: result_ref.clone(),
                }),
                None => {
                    tracing::warn!(
                        job_id = %existing.job_id,
                        "Completed job record has no result reference, starting a new attempt"
                    );
                    write(|job_id| AdmissionDecision::Admitted {
                        job_id,
                        fresh: true,
                    })
                }
            },
            JobStatus::Failed => write(|job_id| AdmissionDecision::Admitted {
                job_id,
                fresh: true,
            }),
            JobStatus::Pending | JobStatus::Processing => {
                if staleness::is_stale(existing, now, self.stale_after) {
                    tracing::warn!(
                        job_id = %existing.job_id,
                        attempt = existing.attempt_count,
                        updated_at = %existing.updated_at,
                        "Reclaiming stale transcription attempt"
                    );
                    write(|job_id| AdmissionDecision::Reclaimed { job_id })
                } else {
                    Step::Respond(AdmissionDecision::Admitted {
                        job_id: existing.job_id,
                        fresh: false,
                    })
                }
            }
        }
    }

    /// Dispatch a freshly written attempt. If the queue cannot take it, fail the
    /// attempt so the next request retries instead of waiting out the threshold.
    async fn hand_off(
        &self,
        record: &JobRecord,
        input: &TranscriptionInput,
    ) -> Result<(), AdmissionError> {
        let Err(source) = self
            .dispatcher
            .dispatch(record.job_id, &record.fingerprint, input)
            .await
        else {
            return Ok(());
        };

        tracing::error!(job_id = %record.job_id, error = %source, "Failed to dispatch job");
        let outcome = JobOutcome::Failed {
            reason: format!("dispatch failed: {source}"),
        };
        match self
            .store
            .update_status(record.job_id, outcome, self.clock.now())
            .await
        {
            Ok(_) | Err(StoreError::StaleWrite(_)) => {}
            Err(e) => {
                tracing::error!(job_id = %record.job_id, error = %e, "Failed to mark undispatched job as failed");
            }
        }

        Err(AdmissionError::Dispatch {
            job_id: record.job_id,
            source,
        })
    }

    fn record_decision(&self, decision: AdmissionDecision) -> AdmissionDecision {
        metrics::counter!("admission_decisions_total", "decision" => decision.label())
            .increment(1);
        decision
    }
}
