use async_trait::async_trait;
use std::sync::Arc;

use crate::models::input::{MediaSource, TranscriptionInput};
use crate::models::job::JobId;
use crate::services::admission::{DispatchError, JobDispatcher};
use crate::services::encryption::MediaCipher;
use crate::services::fingerprint::FingerprintKey;
use crate::services::queue::{JobQueue, QueuedJob, QueuedSource};
use crate::services::storage::{self, R2Client};

/// Stages uploaded media in R2 (sealed) and pushes the attempt onto the Redis queue.
pub struct QueueDispatcher {
    queue: Arc<JobQueue>,
    storage: Arc<R2Client>,
    cipher: Arc<MediaCipher>,
}

impl QueueDispatcher {
    pub fn new(queue: Arc<JobQueue>, storage: Arc<R2Client>, cipher: Arc<MediaCipher>) -> Self {
        Self {
            queue,
            storage,
            cipher,
        }
    }

    async fn stage(
        &self,
        fingerprint: &FingerprintKey,
        source: &MediaSource,
    ) -> Result<QueuedSource, DispatchError> {
        match source {
            MediaSource::Url(url) => Ok(QueuedSource::Url { url: url.trim().to_string() }),
            MediaSource::Upload {
                file_name, bytes, ..
            } => {
                // Same bytes always land on the same key, so re-staging on a retry is harmless.
                let object_key = storage::upload_key(fingerprint);
                let sealed = self.cipher.seal(bytes)?;
                self.storage
                    .put(&object_key, &sealed, "application/octet-stream")
                    .await?;
                Ok(QueuedSource::Upload {
                    object_key,
                    file_name: file_name.clone(),
                })
            }
        }
    }
}

#[async_trait]
impl JobDispatcher for QueueDispatcher {
    async fn dispatch(
        &self,
        job_id: JobId,
        fingerprint: &FingerprintKey,
        input: &TranscriptionInput,
    ) -> Result<(), DispatchError> {
        let source = self.stage(fingerprint, &input.source).await?;

        let job = QueuedJob {
            job_id,
            fingerprint: *fingerprint,
            source,
            display_name: input.display_name(),
            title: input.title.clone(),
            meeting_type: input.meeting_type.clone(),
            participants: input.participants.clone(),
            submitted_by: input.submitted_by.clone(),
        };
        self.queue.enqueue(&job).await?;

        metrics::counter!("transcription_jobs_total").increment(1);
        tracing::info!(job_id = %job_id, fingerprint = %fingerprint, "Job queued for transcription");
        Ok(())
    }
}
