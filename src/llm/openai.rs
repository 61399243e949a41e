//! `OpenAI`-compatible streaming chat completions

use super::sse::SseDataStream;
use super::types::{ChatMessage, CompletionRequest, CompletionStream, StreamChunk};
use super::{CompletionProvider, LlmError};
use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Provider for any endpoint speaking the `OpenAI` chat completions protocol
pub struct OpenAiProvider {
    client: Client,
}

impl OpenAiProvider {
    /// Build a provider whose connections give up after `connect_timeout`.
    ///
    /// No overall request timeout is set since responses stream for as long
    /// as the model keeps producing output.
    pub fn new(connect_timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn endpoint(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let body = OpenAiRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
        };

        let mut builder = self
            .client
            .post(Self::endpoint(&request.base_url))
            .header("Accept", "text/event-stream")
            .json(&body);
        if !request.api_key.is_empty() {
            builder = builder.bearer_auth(&request.api_key);
        }

        let response = builder.send().await.map_err(|e| LlmError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
            let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
                .map_or(body, |resp| resp.error.into_message());
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        let events = SseDataStream::new(Box::pin(response.bytes_stream()));
        Ok(Box::pin(ChunkStream::new(events)))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

/// Providers send either `{"message": ...}` or a bare string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OpenAiError {
    Detailed { message: String },
    Plain(String),
}

impl OpenAiError {
    fn into_message(self) -> String {
        match self {
            OpenAiError::Detailed { message } | OpenAiError::Plain(message) => message,
        }
    }
}

/// Longest slice of an unreadable payload quoted in the error
const PAYLOAD_EXCERPT_CHARS: usize = 120;

// ============================================================================
// Chunk adapter
// ============================================================================

/// Turns SSE payloads into text deltas, ending at `[DONE]`
struct ChunkStream<S> {
    events: SseDataStream<S>,
    done: bool,
}

impl<S> ChunkStream<S> {
    fn new(events: SseDataStream<S>) -> Self {
        Self {
            events,
            done: false,
        }
    }

    /// `None` for payloads that carry no text
    fn parse(payload: &str) -> Option<Result<StreamChunk, LlmError>> {
        let chunk: OpenAiStreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                let excerpt: String = payload.chars().take(PAYLOAD_EXCERPT_CHARS).collect();
                return Some(Err(LlmError::server_error(format!(
                    "Unreadable stream payload ({e}): {excerpt}"
                ))));
            }
        };

        if let Some(error) = chunk.error {
            return Some(Err(LlmError::server_error(format!(
                "Provider error mid-stream: {}",
                error.into_message()
            ))));
        }

        let delta: String = chunk
            .choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .collect();
        if delta.is_empty() {
            None
        } else {
            Some(Ok(StreamChunk::new(delta)))
        }
    }
}

impl<S, B, E> Stream for ChunkStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = Result<StreamChunk, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        loop {
            match Pin::new(&mut self.events).poll_next(cx) {
                Poll::Ready(Some(Ok(payload))) => {
                    if payload.trim() == "[DONE]" {
                        self.done = true;
                        return Poll::Ready(None);
                    }
                    if let Some(item) = Self::parse(&payload) {
                        self.done = item.is_err();
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LlmError::network(format!(
                        "Stream interrupted: {e}"
                    )))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
