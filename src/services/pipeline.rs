use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::transcriptions;
use crate::models::job::ResultRef;
use crate::models::transcription::NewTranscription;
use crate::services::download::{DownloadError, MediaDownloader};
use crate::services::encryption::{EncryptionError, MediaCipher};
use crate::services::queue::{QueuedJob, QueuedSource};
use crate::services::storage::{R2Client, StorageError};
use crate::services::summarizer::OpenAiSummarizer;
use crate::services::transcriber::{AssemblyAiClient, TranscriberError};
use crate::services::worker::JobRunner;

/// Media → transcript → summary → saved row.
pub struct TranscriptionPipeline {
    db: PgPool,
    storage: R2Client,
    cipher: MediaCipher,
    downloader: MediaDownloader,
    transcriber: AssemblyAiClient,
    summarizer: OpenAiSummarizer,
}

impl TranscriptionPipeline {
    pub fn new(
        db: PgPool,
        storage: R2Client,
        cipher: MediaCipher,
        downloader: MediaDownloader,
        transcriber: AssemblyAiClient,
        summarizer: OpenAiSummarizer,
    ) -> Self {
        Self {
            db,
            storage,
            cipher,
            downloader,
            transcriber,
            summarizer,
        }
    }

    // Video containers go to AssemblyAI as-is; it extracts the audio track itself.
    async fn resolve_media(&self, job: &QueuedJob) -> Result<Vec<u8>, PipelineError> {
        match &job.source {
            QueuedSource::Url { url } => Ok(self.downloader.fetch(url).await?),
            QueuedSource::Upload { object_key, .. } => {
                let sealed = self.storage.get(object_key).await?;
                Ok(self.cipher.open(&sealed)?)
            }
        }
    }
}

#[async_trait]
impl JobRunner for TranscriptionPipeline {
    async fn run(&self, job: &QueuedJob) -> Result<ResultRef, PipelineError> {
        let media = self.resolve_media(job).await?;
        tracing::debug!(job_id = %job.job_id, bytes = media.len(), "Media resolved");

        let transcribe_start = std::time::Instant::now();
        let transcript = self.transcriber.transcribe(media).await?;
        tracing::info!(
            job_id = %job.job_id,
            transcribe_duration_ms = transcribe_start.elapsed().as_millis() as u64,
            characters = transcript.len(),
            "Transcription complete"
        );

        let mut summary = self
            .summarizer
            .summarize(&transcript, &job.display_name)
            .await;
        if let Some(title) = job.title.as_ref().filter(|t| !t.trim().is_empty()) {
            summary.title = title.clone();
        }
        if summary.participants.is_empty() {
            summary.participants = job.participants.clone();
        }

        let source_url = match &job.source {
            QueuedSource::Url { url } => Some(url.clone()),
            QueuedSource::Upload { .. } => None,
        };

        let id = transcriptions::insert_transcription(
            &self.db,
            &NewTranscription {
                job_id: job.job_id,
                fingerprint: job.fingerprint,
                source_url,
                file_name: job.display_name.clone(),
                user_id: job.submitted_by.clone(),
                meeting_type: job.meeting_type.clone(),
                transcript,
                summary,
            },
        )
        .await?;

        tracing::debug!(job_id = %job.job_id, transcription_id = id, "Transcription saved");
        Ok(ResultRef::new(id.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("staged upload unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("transcription failed: {0}")]
    Transcriber(#[from] TranscriberError),

    #[error("failed to save transcription: {0}")]
    Database(#[from] sqlx::Error),
}
