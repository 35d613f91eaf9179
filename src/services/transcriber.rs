use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;

const DEFAULT_BASE_URL: &str = "https://api.assemblyai.com/v2";

/// Polling schedule while AssemblyAI works on a transcript.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub initial: Duration,
    pub step: Duration,
    pub max_interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            step: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            max_wait: Duration::from_secs(3600),
        }
    }
}

impl PollSchedule {
    fn next(&self, current: Duration) -> Duration {
        (current + self.step).min(self.max_interval)
    }
}

/// Client for the AssemblyAI speech-to-text API.
pub struct AssemblyAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    language_code: String,
    schedule: PollSchedule,
}

#[derive(Serialize)]
struct TranscriptRequest<'a> {
    audio_url: &'a str,
    language_code: &'a str,
}

#[derive(Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Deserialize)]
struct TranscriptResponse {
    id: String,
    status: TranscriptStatus,
    text: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TranscriptStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl AssemblyAiClient {
    pub fn new(api_key: impl Into<String>, language_code: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            language_code: language_code.into(),
            schedule: PollSchedule::default(),
        }
    }

    /// Upload media, start a transcript and wait for its text.
    pub async fn transcribe(&self, media: Vec<u8>) -> Result<String, TranscriberError> {
        let upload_url = self.upload(media).await?;
        let transcript_id = self.start(&upload_url).await?;
        self.wait_for_completion(&transcript_id).await
    }

    async fn upload(&self, media: Vec<u8>) -> Result<String, TranscriberError> {
        let size = media.len();
        let response: UploadResponse = self
            .http
            .post(format!("{}/upload", self.base_url))
            .header("authorization", &self.api_key)
            .body(media)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::debug!(bytes = size, "Uploaded media to AssemblyAI");
        Ok(response.upload_url)
    }

    async fn start(&self, audio_url: &str) -> Result<String, TranscriberError> {
        let response: TranscriptResponse = self
            .http
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&TranscriptRequest {
                audio_url,
                language_code: &self.language_code,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!(transcript_id = %response.id, "Started AssemblyAI transcript");
        Ok(response.id)
    }

    async fn poll(&self, transcript_id: &str) -> Result<TranscriptResponse, TranscriberError> {
        Ok(self
            .http
            .get(format!("{}/transcript/{}", self.base_url, transcript_id))
            .header("authorization", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn wait_for_completion(&self, transcript_id: &str) -> Result<String, TranscriberError> {
        let started = Instant::now();
        let mut interval = self.schedule.initial;

        while started.elapsed() < self.schedule.max_wait {
            let transcript = self.poll(transcript_id).await?;
            match transcript.status {
                TranscriptStatus::Completed => {
                    tracing::info!(
                        transcript_id,
                        elapsed_s = started.elapsed().as_secs(),
                        "AssemblyAI transcript completed"
                    );
                    return Ok(transcript.text.unwrap_or_default());
                }
                TranscriptStatus::Error => {
                    return Err(TranscriberError::Rejected(
                        transcript
                            .error
                            .unwrap_or_else(|| "unknown transcription error".to_string()),
                    ));
                }
                TranscriptStatus::Queued | TranscriptStatus::Processing => {
                    sleep(interval).await;
                    interval = self.schedule.next(interval);
                }
            }
        }

        Err(TranscriberError::TimedOut {
            transcript_id: transcript_id.to_string(),
            waited: self.schedule.max_wait,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriberError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AssemblyAI rejected the transcript: {0}")]
    Rejected(String),

    #[error("transcript {transcript_id} did not finish within {waited:?}")]
    TimedOut {
        transcript_id: String,
        waited: Duration,
    },
}
