//! Shared test doubles and HTTP helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use transcribe_gate::models::input::TranscriptionInput;
use transcribe_gate::models::job::{JobId, JobOutcome, JobRecord};
use transcribe_gate::services::admission::{AdmissionController, DispatchError, JobDispatcher};
use transcribe_gate::services::auth::Claims;
use transcribe_gate::services::clock::Clock;
use transcribe_gate::services::fingerprint::FingerprintKey;
use transcribe_gate::services::job_store::{Expected, InMemoryJobStore, JobStore, StoreError};
use transcribe_gate::services::queue::QueueError;

pub const THRESHOLD_SECS: i64 = 30 * 60;

pub fn threshold() -> Duration {
    Duration::seconds(THRESHOLD_SECS)
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Dispatcher that remembers every hand-off.
#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<JobId>>,
}

impl RecordingDispatcher {
    pub fn dispatched(&self) -> Vec<JobId> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        job_id: JobId,
        _fingerprint: &FingerprintKey,
        _input: &TranscriptionInput,
    ) -> Result<(), DispatchError> {
        self.dispatched.lock().unwrap().push(job_id);
        Ok(())
    }
}

/// Dispatcher whose queue is always down.
pub struct FailingDispatcher;

#[async_trait]
impl JobDispatcher for FailingDispatcher {
    async fn dispatch(
        &self,
        _job_id: JobId,
        _fingerprint: &FingerprintKey,
        _input: &TranscriptionInput,
    ) -> Result<(), DispatchError> {
        let err = serde_json::from_str::<u8>("not json").unwrap_err();
        Err(DispatchError::Queue(QueueError::Serialize(err)))
    }
}

/// Store wrapper that counts calls, to assert a path never touched the store.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryJobStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for CountingStore {
    async fn get(&self, fingerprint: &FingerprintKey) -> Result<Option<JobRecord>, StoreError> {
        self.tick();
        self.inner.get(fingerprint).await
    }

    async fn get_by_job_id(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.tick();
        self.inner.get_by_job_id(job_id).await
    }

    async fn create_or_replace(
        &self,
        record: &JobRecord,
        expected: Expected,
    ) -> Result<bool, StoreError> {
        self.tick();
        self.inner.create_or_replace(record, expected).await
    }

    async fn update_status(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        self.tick();
        self.inner.update_status(job_id, outcome, at).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

/// Store that lets a rival request win the first conditional write.
///
/// Right before the first `create_or_replace` it writes `rival` as a new
/// attempt on top of whatever is stored, so the caller's swap fails.
pub struct RacingStore {
    pub inner: InMemoryJobStore,
    rival: Mutex<Option<JobRecord>>,
    raced: AtomicBool,
}

impl RacingStore {
    pub fn new(inner: InMemoryJobStore) -> Self {
        Self {
            inner,
            rival: Mutex::new(None),
            raced: AtomicBool::new(false),
        }
    }

    /// Job id of the attempt the rival wrote, once the race has happened.
    pub fn rival_job_id(&self) -> Option<JobId> {
        self.rival.lock().unwrap().as_ref().map(|r| r.job_id)
    }
}

#[async_trait]
impl JobStore for RacingStore {
    async fn get(&self, fingerprint: &FingerprintKey) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get(fingerprint).await
    }

    async fn get_by_job_id(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get_by_job_id(job_id).await
    }

    async fn create_or_replace(
        &self,
        record: &JobRecord,
        expected: Expected,
    ) -> Result<bool, StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let current = self.inner.get(&record.fingerprint).await?;
            let rival = JobRecord::new_attempt(record.fingerprint, current.as_ref(), record.updated_at);
            assert!(
                self.inner
                    .create_or_replace(&rival, Expected::of(current.as_ref()))
                    .await?
            );
            *self.rival.lock().unwrap() = Some(rival);
        }
        self.inner.create_or_replace(record, expected).await
    }

    async fn update_status(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        self.inner.update_status(job_id, outcome, at).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store on which every conditional write loses and nothing is ever visible.
pub struct AlwaysLosingStore;

#[async_trait]
impl JobStore for AlwaysLosingStore {
    async fn get(&self, _fingerprint: &FingerprintKey) -> Result<Option<JobRecord>, StoreError> {
        Ok(None)
    }

    async fn get_by_job_id(&self, _job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(None)
    }

    async fn create_or_replace(
        &self,
        _record: &JobRecord,
        _expected: Expected,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn update_status(
        &self,
        job_id: JobId,
        _outcome: JobOutcome,
        _at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        Err(StoreError::StaleWrite(job_id))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Controller over an in-memory store, a manual clock at [`epoch`] and a recording dispatcher.
pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub clock: Arc<ManualClock>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub controller: AdmissionController,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let controller = AdmissionController::new(
            store.clone(),
            dispatcher.clone(),
            clock.clone(),
            threshold(),
        );
        Self {
            store,
            clock,
            dispatcher,
            controller,
        }
    }

    pub async fn record_for(&self, input: &TranscriptionInput) -> Option<JobRecord> {
        let key = transcribe_gate::services::fingerprint::fingerprint(&input.source).unwrap();
        self.store.get(&key).await.unwrap()
    }
}

pub fn meeting_url() -> TranscriptionInput {
    TranscriptionInput::from_url("https://media.example.com/recordings/standup-2025-03-14.mp4")
}

// ---------------------------------------------------------------------------
// HTTP helpers for tests against a running server
// ---------------------------------------------------------------------------

/// Response body of both submission endpoints.
#[derive(Debug, Deserialize)]
pub struct TranscribeResponse {
    pub job_id: Uuid,
    pub decision: String,
    pub status: String,
    pub result_ref: Option<String>,
    pub message: String,
}

/// Response body of GET /api/jobs/{job_id}
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub attempt_count: i32,
    pub result_ref: Option<String>,
    pub error: Option<String>,
}

pub fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

/// Mint a short-lived token signed with `JWT_SECRET`.
pub fn bearer_token(user_id: &str) -> String {
    let secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as u64,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to sign token")
}

pub async fn submit_url(
    client: &reqwest::Client,
    video_url: &str,
    force: bool,
) -> Result<TranscribeResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/transcribe", base_url()))
        .bearer_auth(bearer_token("e2e-user"))
        .json(&serde_json::json!({ "video_url": video_url, "force": force }))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}

pub async fn get_job(
    client: &reqwest::Client,
    job_id: Uuid,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{}/api/jobs/{}", base_url(), job_id))
        .bearer_auth(bearer_token("e2e-user"))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}
