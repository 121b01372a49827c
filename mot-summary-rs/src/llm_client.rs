// mot-summary-rs/src/llm_client.rs
//
// HTTP client for the summarization model (OpenAI-compatible API)
//
// This module provides:
// - Streaming chat-completion calls via reqwest
// - Incremental parsing of the provider's SSE `data:` lines into text fragments
// - Error classification kept separate from the MOT pipeline's errors
//
// Configuration (.env file):
// - LLM_API_KEY: API key for the LLM provider
// - LLM_API_URL: API endpoint URL (defaults to OpenAI compatible endpoint)
// - LLM_MODEL: Model to use (e.g. "gpt-3.5-turbo")

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;

use crate::mot_client::REQUEST_TIMEOUT;

/// Fixed prefix prepended to every summary sent to the model.
pub const SUMMARY_PROMPT_PREFIX: &str = "Summarize the following vehicle MOT history:\n\n";

/// Build the model prompt for a rendered MOT summary.
pub fn build_prompt(summary: &str) -> String {
    format!("{}{}", SUMMARY_PROMPT_PREFIX, summary)
}

// Custom error type for LLM client operations
#[derive(Debug)]
pub enum LLMError {
    InvalidRequest(String),    // 400, 401, 403, 404 - client-side errors
    RateLimitExceeded(String), // 429
    ServerError(String),       // 500, 502, 503, 504
    NetworkError(String),      // Connection issues, timeouts
    ParseError(String),        // Malformed stream payloads
    UnknownError(String),      // Any other unclassified error
}

impl std::fmt::Display for LLMError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            LLMError::RateLimitExceeded(msg) => write!(f, "Rate limit exceeded: {}", msg),
            LLMError::ServerError(msg) => write!(f, "Server error: {}", msg),
            LLMError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LLMError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            LLMError::UnknownError(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for LLMError {}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// An in-flight model response: an ordered, finite sequence of text
/// fragments. Owned by exactly one consumer; dropping it drops the
/// underlying HTTP response.
pub struct SummaryStream {
    inner: BoxStream<'static, Result<Bytes, LLMError>>,
    buffer: String,
    done: bool,
}

impl SummaryStream {
    pub fn new(stream: impl Stream<Item = Result<Bytes, LLMError>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
            buffer: String::new(),
            done: false,
        }
    }

    /// Next text fragment from the model, in order.
    ///
    /// Returns `None` once the provider signals completion or after the
    /// first error has been yielded; a mid-stream failure is reported
    /// exactly once and then the stream ends.
    pub async fn next_fragment(&mut self) -> Option<Result<String, LLMError>> {
        if self.done {
            return None;
        }

        loop {
            // Drain complete lines already buffered before polling for more bytes.
            while let Some(pos) = self.buffer.find('\n') {
                let line: String = self.buffer.drain(..=pos).collect();
                let trimmed = line.trim();

                let payload = match trimmed.strip_prefix("data:") {
                    Some(rest) => rest.trim(),
                    None => continue, // comments, blank keep-alive lines
                };

                if payload == "[DONE]" {
                    self.done = true;
                    return None;
                }

                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(chunk) => {
                        let content = chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|choice| choice.delta.content);
                        if let Some(text) = content {
                            if !text.is_empty() {
                                return Some(Ok(text));
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!("Skipping malformed stream chunk: {}", err);
                    }
                }
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct LLMClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl LLMClient {
    /// Creates a new LLMClient with configuration from environment variables.
    pub fn new() -> Self {
        let api_url = env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
        let api_key = env::var("LLM_API_KEY").unwrap_or_default();

        if api_key.is_empty() {
            log::warn!("LLM_API_KEY is not set; summarization calls will fail");
        }

        // A total-request deadline would sever long streamed replies; bound
        // the connect and per-read stalls instead.
        let client = match Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .read_timeout(REQUEST_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                log::error!(
                    "Failed to build streaming HTTP client: {}. Falling back to the default client.",
                    err
                );
                Client::default()
            }
        };

        Self {
            client,
            api_key,
            api_url,
            model,
        }
    }

    /// Check if the LLM client is properly configured.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Start a streaming chat-completion request for the given prompt.
    ///
    /// The HTTP status is checked before any fragment is yielded, so a
    /// rejected request fails here rather than mid-stream.
    pub async fn stream_summary(&self, prompt: &str) -> Result<SummaryStream, LLMError> {
        if self.api_key.is_empty() {
            return Err(LLMError::InvalidRequest("API key is not set".to_string()));
        }

        let request_body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: true,
        };

        log::info!(
            "Starting LLM stream to {} (model: {})",
            self.api_url,
            self.model
        );

        let response = match self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                if err.is_timeout() {
                    return Err(LLMError::NetworkError(format!("Request timed out: {}", err)));
                } else if err.is_connect() {
                    return Err(LLMError::NetworkError(format!("Connection failed: {}", err)));
                } else {
                    return Err(LLMError::NetworkError(format!("Network error: {}", err)));
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();

            return match status.as_u16() {
                400 => Err(LLMError::InvalidRequest(format!("Bad request: {}", text))),
                401 => Err(LLMError::InvalidRequest(format!("Unauthorized: {}", text))),
                403 => Err(LLMError::InvalidRequest(format!("Forbidden: {}", text))),
                404 => Err(LLMError::InvalidRequest(format!("Not found: {}", text))),
                429 => Err(LLMError::RateLimitExceeded(format!(
                    "Rate limit exceeded: {}",
                    text
                ))),
                500 | 502 | 503 | 504 => Err(LLMError::ServerError(format!(
                    "Server error ({}): {}",
                    status, text
                ))),
                _ => Err(LLMError::UnknownError(format!(
                    "Unknown error ({}): {}",
                    status, text
                ))),
            };
        }

        let bytes = response
            .bytes_stream()
            .map(|item| item.map_err(|err| LLMError::NetworkError(format!("Stream error: {}", err))));

        Ok(SummaryStream::new(bytes))
    }
}
