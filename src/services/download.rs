use reqwest::Client;
use std::time::Duration;

/// Fetches remote media for URL-submitted jobs.
pub struct MediaDownloader {
    http: Client,
    max_bytes: u64,
}

impl MediaDownloader {
    pub fn new(max_bytes: u64) -> Result<Self, DownloadError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(1800))
            .build()?;
        Ok(Self { http, max_bytes })
    }

    /// Download the whole body, refusing anything larger than `max_bytes`.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(DownloadError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(DownloadError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(DownloadError::Empty);
        }
        tracing::debug!(url, bytes = body.len(), "Downloaded media");
        Ok(body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("media exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("remote media is empty")]
    Empty,
}
