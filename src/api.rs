//! HTTP and WebSocket API for chat-relay

mod handlers;
mod types;
mod ws;

pub use handlers::create_router;

use crate::db::Database;
use crate::llm::CompletionProvider;
use crate::presenter::HtmlPresenter;
use crate::session::DatabaseStore;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub store: Arc<DatabaseStore>,
    pub provider: Arc<dyn CompletionProvider>,
    pub presenter: Arc<HtmlPresenter>,
    pub stream_idle_timeout: Duration,
}

impl AppState {
    pub fn new(
        db: Database,
        provider: Arc<dyn CompletionProvider>,
        stream_idle_timeout: Duration,
    ) -> Self {
        Self {
            store: Arc::new(DatabaseStore::new(db.clone())),
            db,
            provider,
            presenter: Arc::new(HtmlPresenter),
            stream_idle_timeout,
        }
    }
}
