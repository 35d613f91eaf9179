use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::job::{JobId, JobOutcome, JobRecord, JobStatus};
use crate::services::fingerprint::FingerprintKey;

/// What a conditional write expects to find under the record's fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Absent,
    Current { job_id: JobId, status: JobStatus },
}

impl Expected {
    pub fn of(record: Option<&JobRecord>) -> Self {
        match record {
            None => Expected::Absent,
            Some(r) => Expected::Current {
                job_id: r.job_id,
                status: r.status,
            },
        }
    }

    fn matches(&self, current: Option<&JobRecord>) -> bool {
        match (self, current) {
            (Expected::Absent, None) => true,
            (Expected::Current { job_id, status }, Some(r)) => {
                r.job_id == *job_id && r.status == *status
            }
            _ => false,
        }
    }
}

/// Durable map from fingerprint to the current attempt.
///
/// Every mutation is conditional: `create_or_replace` compares the current
/// `(job_id, status)` and `update_status` only touches an attempt that is
/// still in flight under its own `job_id`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, fingerprint: &FingerprintKey) -> Result<Option<JobRecord>, StoreError>;

    /// Current attempt with this id, if it has not been superseded.
    async fn get_by_job_id(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Write `record` if the stored state still matches `expected`.
    /// Returns `false` when another writer got there first.
    async fn create_or_replace(
        &self,
        record: &JobRecord,
        expected: Expected,
    ) -> Result<bool, StoreError>;

    /// Record the terminal outcome of an attempt.
    ///
    /// Fails with [`StoreError::StaleWrite`] when `job_id` is no longer the
    /// current in-flight attempt of any fingerprint.
    async fn update_status(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError>;

    /// Cheap connectivity check for health endpoints.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    #[error("stale write for job {0}: attempt was superseded or already finished")]
    StaleWrite(JobId),

    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

/// Process-local store. One mutex covers the whole map, so each call is atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: Mutex<HashMap<FingerprintKey, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a record unconditionally.
    pub fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        self.lock()?.insert(record.fingerprint, record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<FingerprintKey, JobRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, fingerprint: &FingerprintKey) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.lock()?.get(fingerprint).cloned())
    }

    async fn get_by_job_id(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .lock()?
            .values()
            .find(|r| r.job_id == job_id)
            .cloned())
    }

    async fn create_or_replace(
        &self,
        record: &JobRecord,
        expected: Expected,
    ) -> Result<bool, StoreError> {
        let mut records = self.lock()?;
        if !expected.matches(records.get(&record.fingerprint)) {
            return Ok(false);
        }
        records.insert(record.fingerprint, record.clone());
        Ok(true)
    }

    async fn update_status(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let mut records = self.lock()?;
        let record = records
            .values_mut()
            .find(|r| r.job_id == job_id && r.status.is_in_flight())
            .ok_or(StoreError::StaleWrite(job_id))?;
        record.apply(outcome, at);
        Ok(record.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
