//! LLM provider abstraction
//!
//! A provider opens a streaming chat completion and yields text deltas in
//! order. The end of the stream marks the end of the response.

mod error;
mod openai;
mod sse;
mod types;

#[allow(unused_imports)] // Public API re-exports
pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAiProvider;
pub use types::*;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Common interface for streaming completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a streaming completion; errors here mean no output was produced
    async fn open_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError>;
}

#[async_trait]
impl<T: CompletionProvider + ?Sized> CompletionProvider for Arc<T> {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        (**self).open_stream(request).await
    }
}

/// Logging wrapper for completion providers
pub struct LoggingProvider {
    inner: Arc<dyn CompletionProvider>,
}

impl LoggingProvider {
    pub fn new(inner: Arc<dyn CompletionProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CompletionProvider for LoggingProvider {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let start = Instant::now();
        let model = request.model.clone();
        let result = self.inner.open_stream(request).await;

        match result {
            Ok(stream) => {
                tracing::info!(
                    model = %model,
                    messages = request.messages.len(),
                    duration_ms = %start.elapsed().as_millis(),
                    "LLM stream opened"
                );
                let mut chunks = 0usize;
                let mut failed = false;
                let logged = stream.inspect(move |item| match item {
                    Ok(_) => chunks += 1,
                    Err(e) if !failed => {
                        failed = true;
                        tracing::error!(
                            model = %model,
                            chunks,
                            duration_ms = %start.elapsed().as_millis(),
                            error = %e.message,
                            retryable = e.kind.is_retryable(),
                            "LLM stream failed"
                        );
                    }
                    Err(_) => {}
                });
                Ok(Box::pin(logged))
            }
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
                Err(e)
            }
        }
    }
}
