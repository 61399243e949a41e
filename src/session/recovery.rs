//! Turning failures into something the user can see
//!
//! A failed turn leaves a system message on the thread and an error notice on
//! the client. Both halves are best-effort: problems here are logged and
//! never propagate.

use super::traits::{Connection, ConversationStore};
use crate::db::Sender;
use crate::presenter::Presenter;
use std::fmt::Display;
use std::sync::Arc;

/// Model label stored on error notices
pub const ERROR_MODEL_LABEL: &str = "error";

/// What the sink managed to do for one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Recovery {
    pub persisted: bool,
    pub emitted: bool,
}

pub fn error_summary(error: &dyn Display) -> String {
    format!("Encountered an error: {error}")
}

pub struct ErrorRecoverySink<S: ?Sized, R: ?Sized> {
    store: Arc<S>,
    presenter: Arc<R>,
}

impl<S, R> ErrorRecoverySink<S, R>
where
    S: ConversationStore + ?Sized,
    R: Presenter + ?Sized,
{
    pub fn new(store: Arc<S>, presenter: Arc<R>) -> Self {
        Self { store, presenter }
    }

    pub async fn recover<C: Connection + ?Sized>(
        &self,
        error: &(dyn Display + Sync),
        thread_id: Option<&str>,
        conn: &mut C,
    ) -> Recovery {
        let summary = error_summary(error);
        tracing::warn!(thread_id = ?thread_id, error = %error, "Turn failed");

        let mut recovery = Recovery::default();

        if let Some(thread_id) = thread_id {
            match self
                .store
                .create_message(thread_id, Sender::System, &summary, ERROR_MODEL_LABEL)
                .await
            {
                Ok(_) => recovery.persisted = true,
                Err(e) => {
                    tracing::error!(
                        thread_id = %thread_id,
                        error = %e,
                        "Failed to record error message"
                    );
                }
            }
        }

        match self.presenter.error(&summary) {
            Ok(fragment) => match conn.send(&fragment).await {
                Ok(()) => recovery.emitted = true,
                Err(e) => tracing::error!(error = %e, "Failed to send error notice"),
            },
            Err(e) => tracing::error!(error = %e, "Failed to render error notice"),
        }

        recovery
    }
}
