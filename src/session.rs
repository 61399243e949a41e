//! Streaming chat sessions
//!
//! One session per client connection. The loop reads an inbound frame,
//! classifies it, runs at most one turn, and reads again. Turn failures are
//! reported through the recovery sink and never end the session; only losing
//! the connection does.

mod envelope;
mod history;
mod recovery;
mod state;
mod traits;
mod turn;

#[cfg(test)]
mod proptests;
#[cfg(test)]
pub mod testing;

pub use traits::{Connection, DatabaseStore, TransportError};

use recovery::ErrorRecoverySink;
use state::{next_step, Step};
use traits::ConversationStore;
use turn::{TurnError, TurnProcessor};

use crate::llm::CompletionProvider;
use crate::presenter::Presenter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub turns: usize,
    pub failures: usize,
}

pub struct SessionLoop<S: ?Sized, P: ?Sized, R: ?Sized> {
    turns: TurnProcessor<S, P, R>,
    sink: ErrorRecoverySink<S, R>,
    cancel: CancellationToken,
}

impl<S, P, R> SessionLoop<S, P, R>
where
    S: ConversationStore + ?Sized,
    P: CompletionProvider + ?Sized,
    R: Presenter + ?Sized,
{
    /// `cancel` should fire when the connection goes away so an in-flight
    /// turn stops waiting on the provider.
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        presenter: Arc<R>,
        stream_idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            turns: TurnProcessor::new(
                store.clone(),
                provider,
                presenter.clone(),
                stream_idle_timeout,
            ),
            sink: ErrorRecoverySink::new(store, presenter),
            cancel,
        }
    }

    pub async fn run<C: Connection + ?Sized>(&self, conn: &mut C) -> SessionSummary {
        let mut summary = SessionSummary::default();

        loop {
            match next_step(conn.recv().await) {
                Step::Terminate(None) => {
                    tracing::info!(turns = summary.turns, "Client closed connection");
                    break;
                }
                Step::Terminate(Some(e)) => {
                    tracing::warn!(error = %e, turns = summary.turns, "Connection read failed");
                    break;
                }
                Step::Ignore => {
                    tracing::debug!("Ignoring empty message");
                }
                Step::Recover { thread_id, error } => {
                    summary.failures += 1;
                    let error = TurnError::from(error);
                    let recovery = self
                        .sink
                        .recover(&error, thread_id.as_deref(), conn)
                        .await;
                    if !recovery.persisted && !recovery.emitted {
                        tracing::error!(error = %error, "Failure could not be reported");
                    }
                }
                Step::ProcessTurn(envelope) => {
                    summary.turns += 1;
                    match self.turns.process(&envelope, conn, &self.cancel).await {
                        Ok(outcome) => {
                            tracing::info!(
                                thread_id = %envelope.thread_id,
                                reply_id = %outcome.reply_id,
                                chunks = outcome.chunks,
                                chars = outcome.content.chars().count(),
                                "Turn completed"
                            );
                        }
                        Err(error) => {
                            summary.failures += 1;
                            let recovery = self
                                .sink
                                .recover(&error, Some(&envelope.thread_id), conn)
                                .await;
                            if !recovery.persisted && !recovery.emitted {
                                tracing::error!(error = %error, "Failure could not be reported");
                            }
                        }
                    }
                }
            }
        }

        summary
    }
}
