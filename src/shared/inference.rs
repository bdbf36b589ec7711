use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("inference request timed out")]
    Timeout,

    #[error("inference service error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("malformed inference response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, InferenceError>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A JSON schema the completion must conform to.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub schema: Option<ResponseSchema>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            schema: None,
        }
    }

    pub fn with_schema(mut self, name: &str, schema: Value) -> Self {
        self.schema = Some(ResponseSchema {
            name: name.to_string(),
            schema,
        });
        self
    }
}

/// The text-completion oracle every LLM-backed component talks to.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    async fn transcribe(&self, file_name: &str, audio: Vec<u8>) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for an OpenAI-compatible chat-completions API.
#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    model: String,
    transcription_model: String,
    log_seq: Arc<AtomicU64>,
}

impl InferenceClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        transcription_model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| format!("Bearer {k}")),
            model: model.to_string(),
            transcription_model: transcription_model.to_string(),
            log_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_header {
            Some(header) => builder.header("Authorization", header),
            None => builder,
        }
    }

    async fn read_success(resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let text = resp.text().await.map_err(map_reqwest)?;
        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for InferenceClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let log_id = self.log_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let response_format = request.schema.as_ref().map(|s| {
            serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": s.name, "schema": s.schema }
            })
        });
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            response_format,
        };

        info!(
            id = log_id,
            model = %self.model,
            messages = request.messages.len(),
            structured = request.schema.is_some(),
            "inference request"
        );

        let resp = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(map_reqwest)?;
        let text = Self::read_success(resp).await?;
        debug!(id = log_id, response = %text, "inference response");

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| InferenceError::Malformed(format!("{e}: {text}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InferenceError::Malformed("response has no message content".into()))
    }

    async fn transcribe(&self, file_name: &str, audio: Vec<u8>) -> Result<String> {
        let url = format!("{}/audio/transcriptions", self.base_url);
        let part = multipart::Part::bytes(audio).file_name(file_name.to_string());
        let form = multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .part("file", part);

        info!(model = %self.transcription_model, %file_name, "transcription request");

        let resp = self
            .authorize(self.client.post(&url).multipart(form))
            .send()
            .await
            .map_err(map_reqwest)?;
        let text = Self::read_success(resp).await?;
        let parsed: TranscriptionResponse = serde_json::from_str(&text)
            .map_err(|e| InferenceError::Malformed(format!("{e}: {text}")))?;
        Ok(parsed.text)
    }
}

fn map_reqwest(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Request(err)
    }
}

/// Strips a ```lang fenced block down to its body, if the text contains one.
pub fn strip_code_fence(text: &str, lang: &str) -> String {
    let opener = format!("```{lang}");
    if let Some(start) = text.find(&opener) {
        let body = &text[start + opener.len()..];
        let body = body.strip_prefix('\n').unwrap_or(body);
        if let Some(end) = body.find("```") {
            return body[..end].to_string();
        }
    }
    text.to_string()
}
