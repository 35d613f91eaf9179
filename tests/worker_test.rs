//! Worker step behaviour with in-memory queue, store and runner doubles.
//!
//! Run with: cargo test --test worker_test

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transcribe_gate::models::job::{JobId, JobOutcome, JobRecord, JobStatus, ResultRef};
use transcribe_gate::services::encryption::EncryptionError;
use transcribe_gate::services::fingerprint::FingerprintKey;
use transcribe_gate::services::job_store::{Expected, InMemoryJobStore, JobStore, StoreError};
use transcribe_gate::services::pipeline::PipelineError;
use transcribe_gate::services::queue::{QueueError, QueuedJob, QueuedSource};
use transcribe_gate::services::worker::{JobRunner, WorkQueue, Worker, WorkerError};

/// Two-list queue mirroring the Redis pending/processing pair.
#[derive(Default)]
struct MemoryQueue {
    pending: Mutex<VecDeque<QueuedJob>>,
    processing: Mutex<Vec<QueuedJob>>,
}

impl MemoryQueue {
    fn with(job: QueuedJob) -> Self {
        let queue = Self::default();
        queue.pending.lock().unwrap().push_back(job);
        queue
    }

    fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn processing(&self) -> usize {
        self.processing.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let job = self.pending.lock().unwrap().pop_front();
        if let Some(job) = &job {
            self.processing.lock().unwrap().push(job.clone());
        }
        Ok(job)
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.processing.lock().unwrap().retain(|j| j != job);
        Ok(())
    }

    async fn requeue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.processing.lock().unwrap().retain(|j| j != job);
        self.pending.lock().unwrap().push_back(job.clone());
        Ok(())
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.pending() as u64)
    }
}

/// In-memory store whose lookups and reports fail a set number of times first.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryJobStore,
    lookup_failures: AtomicUsize,
    report_failures: AtomicUsize,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn get(&self, fingerprint: &FingerprintKey) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get(fingerprint).await
    }

    async fn get_by_job_id(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        if take_failure(&self.lookup_failures) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.get_by_job_id(job_id).await
    }

    async fn create_or_replace(
        &self,
        record: &JobRecord,
        expected: Expected,
    ) -> Result<bool, StoreError> {
        self.inner.create_or_replace(record, expected).await
    }

    async fn update_status(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        if take_failure(&self.report_failures) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.update_status(job_id, outcome, at).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

enum Behaviour {
    Succeed,
    Fail,
    Hang,
}

struct ScriptedRunner {
    behaviour: Behaviour,
    runs: AtomicUsize,
}

impl ScriptedRunner {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            runs: AtomicUsize::new(0),
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run(&self, _job: &QueuedJob) -> Result<ResultRef, PipelineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Succeed => Ok(ResultRef::new("101")),
            Behaviour::Fail => Err(PipelineError::Encryption(EncryptionError::OpenFailed)),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ResultRef::new("never"))
            }
        }
    }
}

/// Seed an in-flight record and the matching queue payload.
fn seeded(store: &FlakyStore) -> QueuedJob {
    let fingerprint = FingerprintKey::from_bytes([9; 32]);
    let record = JobRecord::new_attempt(fingerprint, None, Utc::now());
    store.inner.insert(record.clone()).unwrap();
    QueuedJob {
        job_id: record.job_id,
        fingerprint,
        source: QueuedSource::Url {
            url: "https://media.example.com/weekly.mp4".into(),
        },
        display_name: "weekly.mp4".into(),
        title: None,
        meeting_type: None,
        participants: Vec::new(),
        submitted_by: Some("user-1".into()),
    }
}

fn worker(store: &Arc<FlakyStore>, queue: &Arc<MemoryQueue>, runner: Arc<ScriptedRunner>) -> Worker {
    Worker::new(store.clone(), queue.clone(), runner, Duration::from_secs(5))
        .with_retry_delay(Duration::from_millis(1))
}

async fn status_of(store: &FlakyStore, job: &QueuedJob) -> JobStatus {
    store.inner.get(&job.fingerprint).await.unwrap().unwrap().status
}

#[tokio::test]
async fn completes_and_releases_job() {
    let store = Arc::new(FlakyStore::default());
    let job = seeded(&store);
    let queue = Arc::new(MemoryQueue::with(job.clone()));
    let runner = ScriptedRunner::new(Behaviour::Succeed);

    assert!(worker(&store, &queue, runner.clone()).process_next_job().await.unwrap());

    let record = store.inner.get(&job.fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.result_ref, Some(ResultRef::new("101")));
    assert_eq!(queue.processing(), 0);
    assert_eq!(runner.runs(), 1);
}

#[tokio::test]
async fn empty_queue_is_idle() {
    let store = Arc::new(FlakyStore::default());
    let queue = Arc::new(MemoryQueue::default());
    let runner = ScriptedRunner::new(Behaviour::Succeed);
    assert!(!worker(&store, &queue, runner).process_next_job().await.unwrap());
}

#[tokio::test]
async fn store_outage_on_lookup_returns_job_to_queue() {
    let store = Arc::new(FlakyStore::default());
    let job = seeded(&store);
    store.lookup_failures.store(1, Ordering::SeqCst);
    let queue = Arc::new(MemoryQueue::with(job.clone()));
    let runner = ScriptedRunner::new(Behaviour::Succeed);
    let worker = worker(&store, &queue, runner.clone());

    let err = worker.process_next_job().await.unwrap_err();
    assert!(matches!(err, WorkerError::Requeued { job_id, .. } if job_id == job.job_id));
    assert_eq!(queue.pending(), 1);
    assert_eq!(queue.processing(), 0);
    assert_eq!(runner.runs(), 0);

    // Once the store is back, the same payload is picked up and finished.
    assert!(worker.process_next_job().await.unwrap());
    assert_eq!(status_of(&store, &job).await, JobStatus::Completed);
    assert_eq!(queue.pending() + queue.processing(), 0);
}

#[tokio::test]
async fn transient_report_failures_are_retried() {
    let store = Arc::new(FlakyStore::default());
    let job = seeded(&store);
    store.report_failures.store(2, Ordering::SeqCst);
    let queue = Arc::new(MemoryQueue::with(job.clone()));

    assert!(worker(&store, &queue, ScriptedRunner::new(Behaviour::Succeed))
        .process_next_job()
        .await
        .unwrap());
    assert_eq!(status_of(&store, &job).await, JobStatus::Completed);
    assert_eq!(queue.processing(), 0);
}

#[tokio::test]
async fn abandoned_report_still_releases_payload() {
    let store = Arc::new(FlakyStore::default());
    let job = seeded(&store);
    store.report_failures.store(usize::MAX, Ordering::SeqCst);
    let queue = Arc::new(MemoryQueue::with(job.clone()));

    let err = worker(&store, &queue, ScriptedRunner::new(Behaviour::Succeed))
        .process_next_job()
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Report { .. }));
    assert_eq!(queue.processing(), 0);
    assert_eq!(queue.pending(), 0);
    // Left in flight; the staleness policy takes it from here.
    assert_eq!(status_of(&store, &job).await, JobStatus::Processing);
}

#[tokio::test]
async fn pipeline_failure_marks_attempt_failed() {
    let store = Arc::new(FlakyStore::default());
    let job = seeded(&store);
    let queue = Arc::new(MemoryQueue::with(job.clone()));

    assert!(worker(&store, &queue, ScriptedRunner::new(Behaviour::Fail))
        .process_next_job()
        .await
        .unwrap());

    let record = store.inner.get(&job.fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.is_some());
}

#[tokio::test]
async fn attempt_past_deadline_is_failed() {
    let store = Arc::new(FlakyStore::default());
    let job = seeded(&store);
    let queue = Arc::new(MemoryQueue::with(job.clone()));
    let worker = Worker::new(
        store.clone(),
        queue.clone(),
        ScriptedRunner::new(Behaviour::Hang),
        Duration::from_millis(50),
    );

    assert!(worker.process_next_job().await.unwrap());

    let record = store.inner.get(&job.fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().contains("deadline"));
    assert_eq!(queue.processing(), 0);
}

#[tokio::test]
async fn superseded_attempt_is_skipped() {
    let store = Arc::new(FlakyStore::default());
    let job = seeded(&store);
    let current = store.inner.get(&job.fingerprint).await.unwrap().unwrap();
    let replacement = JobRecord::new_attempt(job.fingerprint, Some(&current), Utc::now());
    store.inner.insert(replacement).unwrap();
    let queue = Arc::new(MemoryQueue::with(job.clone()));
    let runner = ScriptedRunner::new(Behaviour::Succeed);

    assert!(worker(&store, &queue, runner.clone()).process_next_job().await.unwrap());
    assert_eq!(runner.runs(), 0);
    assert_eq!(queue.processing(), 0);
    assert_eq!(status_of(&store, &job).await, JobStatus::Processing);
}

#[tokio::test]
async fn worker_metrics_reach_the_recorder() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let store = Arc::new(FlakyStore::default());
    let job = seeded(&store);
    let queue = Arc::new(MemoryQueue::with(job));
    worker(&store, &queue, ScriptedRunner::new(Behaviour::Succeed))
        .process_next_job()
        .await
        .unwrap();

    let rendered = handle.render();
    assert!(rendered.contains("transcription_jobs_completed 1"), "{rendered}");
    assert!(rendered.contains("transcription_queue_depth 0"), "{rendered}");
    assert!(rendered.contains("transcription_processing_seconds"), "{rendered}");
}
