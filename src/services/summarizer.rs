use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::transcription::MeetingSummary;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f32 = 0.2;

/// Turns a raw transcript into a [`MeetingSummary`] via OpenAI chat completions.
pub struct OpenAiSummarizer {
    http: Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiSummarizer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Summarize a transcript. Never fails: model or parse errors yield the fallback summary.
    pub async fn summarize(&self, transcript: &str, display_name: &str) -> MeetingSummary {
        match self.complete(&build_prompt(transcript)).await {
            Ok(text) => {
                let parsed = extract_json_object(&text).unwrap_or_else(|| {
                    tracing::warn!("Summary response contained no JSON object");
                    Value::Null
                });
                MeetingSummary::from_model_output(&parsed, display_name)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Summarization failed, using fallback summary");
                MeetingSummary::fallback(display_name)
            }
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, SummarizerError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        let response: CompletionResponse = self
            .http
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or(SummarizerError::EmptyCompletion)
    }
}

fn build_prompt(transcript: &str) -> String {
    format!(
        r#"Analyze the meeting transcript below in detail and answer ONLY with a valid JSON object, written in Brazilian Portuguese.

TRANSCRIPT:
{transcript}

Required JSON shape:
{{
  "title": "descriptive, professional meeting title based on the content",
  "client": "client name",
  "project": "project name",
  "rito": "meeting type",
  "executive_summary": "detailed executive summary (3-4 sentences)",
  "decisions": ["specific decision with context"],
  "main_points": ["main point with details"],
  "action_items": ["specific action with owner and deadline"],
  "tag": ["tag"],
  "participants": ["name"]
}}

Rules:
- Always answer in Brazilian Portuguese.
- Extract numbers, metrics, dates, names, deadlines, risks and next steps where mentioned.
- Use "N/A" for unknown text fields.
- Keep the JSON valid."#
    )
}

/// Pull a JSON object out of a model reply that may wrap it in code fences or prose.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let as_object = |candidate: &str| {
        serde_json::from_str::<Value>(candidate)
            .ok()
            .filter(Value::is_object)
    };

    if let Some(value) = as_object(text) {
        return Some(value);
    }

    let mut body = text.trim();
    for fence in ["```json", "```JSON", "```"] {
        if let Some(rest) = body.strip_prefix(fence) {
            body = rest.trim();
            break;
        }
    }
    body = body.strip_suffix("```").unwrap_or(body).trim();
    if let Some(value) = as_object(body) {
        return Some(value);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| as_object(&body[start..=end])).flatten()
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion contained no message content")]
    EmptyCompletion,
}
