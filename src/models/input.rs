/// Where the media to transcribe comes from. Only this part identifies a request.
#[derive(Debug, Clone)]
pub enum MediaSource {
    Url(String),
    Upload {
        file_name: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

/// A transcription request as seen by the admission controller.
#[derive(Debug, Clone)]
pub struct TranscriptionInput {
    pub source: MediaSource,
    pub title: Option<String>,
    pub meeting_type: Option<String>,
    pub participants: Vec<String>,
    pub submitted_by: Option<String>,
}

impl TranscriptionInput {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(MediaSource::Url(url.into()))
    }

    pub fn from_upload(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(MediaSource::Upload {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        })
    }

    fn new(source: MediaSource) -> Self {
        Self {
            source,
            title: None,
            meeting_type: None,
            participants: Vec::new(),
            submitted_by: None,
        }
    }

    /// Name used when the summary has no better title.
    pub fn display_name(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return title.to_string();
        }
        match &self.source {
            MediaSource::Url(url) => url_basename(url),
            MediaSource::Upload { file_name, .. } => file_name.clone(),
        }
    }
}

pub(crate) fn url_basename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(path)
        .to_string()
}
