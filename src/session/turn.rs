//! One request/response turn
//!
//! Persists the user's message and a reply placeholder, relays the provider's
//! stream to the client, then records the final reply and thread activity.

use super::envelope::{Envelope, EnvelopeError};
use super::history::build_history;
use super::traits::{Connection, ConversationStore, TransportError};
use crate::db::{timestamp_now, DbError, Sender};
use crate::llm::{CompletionProvider, CompletionRequest, LlmError};
use crate::presenter::{Presenter, RenderError};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Characters of the reply kept as the thread's excerpt
pub const EXCERPT_CHARS: usize = 10;

/// Failures that abort a single turn
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("No API selected")]
    NoProviderSelected,
    #[error(transparent)]
    Store(#[from] DbError),
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("No response from model within {0:?}")]
    TimedOut(Duration),
    #[error("Connection closed before the reply finished")]
    Cancelled,
}

/// Result of a completed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply_id: String,
    pub content: String,
    pub chunks: usize,
}

/// First characters of a reply, whole text when shorter
pub fn excerpt(content: &str) -> String {
    content.chars().take(EXCERPT_CHARS).collect()
}

pub struct TurnProcessor<S: ?Sized, P: ?Sized, R: ?Sized> {
    store: Arc<S>,
    provider: Arc<P>,
    presenter: Arc<R>,
    idle_timeout: Duration,
}

impl<S, P, R> TurnProcessor<S, P, R>
where
    S: ConversationStore + ?Sized,
    P: CompletionProvider + ?Sized,
    R: Presenter + ?Sized,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, presenter: Arc<R>, idle_timeout: Duration) -> Self {
        Self {
            store,
            provider,
            presenter,
            idle_timeout,
        }
    }

    pub async fn process<C: Connection + ?Sized>(
        &self,
        envelope: &Envelope,
        conn: &mut C,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let thread_id = envelope.thread_id.as_str();

        let provider = self
            .store
            .active_provider()
            .await?
            .ok_or(TurnError::NoProviderSelected)?;
        let label = provider.model_label();

        self.store
            .create_message(thread_id, Sender::Human, &envelope.text, &label)
            .await?;
        let reply = self
            .store
            .create_message(thread_id, Sender::Model, "", "")
            .await?;
        let reply_id = reply.message_id;

        tracing::info!(
            thread_id = %thread_id,
            reply_id = %reply_id,
            api_id = %provider.api_id,
            model = %label,
            trigger = ?envelope.trigger(),
            "Turn started"
        );

        conn.send(&self.presenter.skeleton(&reply_id, &envelope.text, &label)?)
            .await?;

        let history = build_history(&self.store.list_messages(thread_id).await?);
        let request = CompletionRequest::new(&provider, history);

        let mut stream = self
            .bounded(self.provider.open_stream(&request), cancel)
            .await??;

        let mut content = String::new();
        let mut chunks = 0;
        while let Some(item) = self.bounded(stream.next(), cancel).await? {
            let chunk = item?;
            if chunk.delta.is_empty() {
                continue;
            }
            content.push_str(&chunk.delta);
            chunks += 1;
            conn.send(&self.presenter.chunk(&reply_id, &chunk.delta)?)
                .await?;
        }

        self.store
            .finalize_message(&reply_id, Sender::Model, &content, &label)
            .await?;

        let now = timestamp_now();
        let thread = self
            .store
            .touch_thread(thread_id, &excerpt(&content), &now)
            .await?;
        // A concurrent turn may have stored a later time
        let at = thread.last_message_timestamp.unwrap_or(now);
        conn.send(&self.presenter.last_message_timestamp(thread_id, &at)?)
            .await?;

        Ok(TurnOutcome {
            reply_id,
            content,
            chunks,
        })
    }

    /// Race a provider wait against the idle timeout and connection shutdown
    async fn bounded<F: Future>(
        &self,
        fut: F,
        cancel: &CancellationToken,
    ) -> Result<F::Output, TurnError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TurnError::Cancelled),
            result = tokio::time::timeout(self.idle_timeout, fut) => {
                result.map_err(|_| TurnError::TimedOut(self.idle_timeout))
            }
        }
    }
}
