use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Upstream generation failures. None of these can be recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode LLM response: {0}")]
    Decode(String),

    #[error("answer stream interrupted")]
    Interrupted,
}

/// Sampling parameters (admins can modify at runtime).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2048,
        }
    }
}

/// Finite, ordered, non-restartable sequence of answer fragments.
///
/// Fragments must be concatenated in arrival order. A stream may end without
/// producing anything.
pub struct AnswerStream {
    rx: mpsc::Receiver<Result<String, LlmError>>,
}

impl AnswerStream {
    pub fn new(rx: mpsc::Receiver<Result<String, LlmError>>) -> Self {
        Self { rx }
    }

    /// Build a stream that replays already-known fragments.
    #[cfg(test)]
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let chunks: Vec<String> = chunks.into_iter().collect();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk, so this never fails.
            let _ = tx.try_send(Ok(chunk));
        }
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Result<String, LlmError>> {
        self.rx.recv().await
    }
}

/// Text-generation capability used by the assistant pipeline.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Non-streaming chat completion over the given transcript.
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError>;

    /// Streaming chat completion over the given transcript.
    async fn stream(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<AnswerStream, LlmError>;
}

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL").unwrap_or_else(|_| {
            "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
        });
        let model =
            dotenv::var("LLM_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let api_key = dotenv::var("LLM_API_KEY")
            .or_else(|_| dotenv::var("GEMINI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        chat_endpoint(&self.base_url)
    }

    fn request(
        &self,
        messages: &[Message],
        params: &GenerationParams,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "stream": stream,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        req
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let resp = self.request(messages, params, false).send().await?;
        let resp = check_status(resp).await?;
        let text = resp.text().await?;
        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))?;

        // Extract content from choices[0].message.content (handle null)
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        debug!(model = %self.model, content_len = content.len(), "completion received");
        Ok(content)
    }

    async fn stream(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<AnswerStream, LlmError> {
        let resp = self.request(messages, params, true).send().await?;
        let resp = check_status(resp).await?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(pump_sse(resp.bytes_stream(), tx));

        Ok(AnswerStream::new(rx))
    }
}

/// Forward the deltas of an SSE body into `tx`. Ends with an error when the
/// provider reports one or the body closes before `[DONE]`.
async fn pump_sse<S, B, E>(body: S, tx: mpsc::Sender<Result<String, LlmError>>)
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<LlmError>,
{
    futures::pin_mut!(body);
    let mut parser = SseParser::default();

    while let Some(next) = body.next().await {
        let bytes = match next {
            Ok(b) => b,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        if !forward(parser.push(bytes.as_ref()), &tx).await {
            return;
        }
    }
    // A final line may lack its newline.
    if !forward(parser.push(b"\n"), &tx).await {
        return;
    }

    warn!("answer stream closed before [DONE]");
    let _ = tx.send(Err(LlmError::Interrupted)).await;
}

/// Send parsed events on; `false` once the stream is over.
async fn forward(events: Vec<SseEvent>, tx: &mpsc::Sender<Result<String, LlmError>>) -> bool {
    for event in events {
        match event {
            SseEvent::Delta(text) => {
                if tx.send(Ok(text)).await.is_err() {
                    // Receiver dropped; nobody is listening anymore.
                    return false;
                }
            }
            SseEvent::Done => return false,
            SseEvent::Error(err) => {
                warn!(error = %err, "provider reported an error mid-stream");
                let _ = tx.send(Err(err)).await;
                return false;
            }
            SseEvent::Malformed(reason) => {
                warn!(reason, "skipping malformed stream event");
            }
        }
    }
    true
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Status {
        status: status.as_u16(),
        body,
    })
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") || base.ends_with("/openai") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

#[derive(Debug)]
enum SseEvent {
    Delta(String),
    Done,
    /// Error object sent by the provider in place of a chunk.
    Error(LlmError),
    Malformed(String),
}

/// Incremental parser for `text/event-stream` chat completion chunks.
/// Network reads may split a line (or a UTF-8 sequence) anywhere, so raw
/// bytes are buffered until a full line is available.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    fn push(&mut self, input: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(input);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(data) {
                Ok(json) if !json["error"].is_null() => {
                    events.push(SseEvent::Error(provider_error(&json["error"])));
                }
                Ok(json) => {
                    let delta = json["choices"]
                        .get(0)
                        .and_then(|c| c["delta"]["content"].as_str())
                        .unwrap_or("");
                    // Role-only and finish chunks carry no text.
                    if !delta.is_empty() {
                        events.push(SseEvent::Delta(delta.to_string()));
                    }
                }
                Err(e) => events.push(SseEvent::Malformed(e.to_string())),
            }
        }

        events
    }
}

/// `{"code": 429, "message": ".."}` → `Status`; anything else → `Decode`.
fn provider_error(error: &serde_json::Value) -> LlmError {
    let body = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    match error["code"].as_u64().and_then(|c| u16::try_from(c).ok()) {
        Some(status) => LlmError::Status { status, body },
        None => LlmError::Decode(format!("provider error: {}", body)),
    }
}
