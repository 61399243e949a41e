//! Trait abstractions for session I/O
//!
//! These traits let the session loop run against mocks in tests.

use crate::db::{
    ApiConfig, Database, DbResult, Message, Sender, Thread, DEFAULT_USERNAME,
};
use crate::llm::ProviderConfig;
use crate::presenter::Fragment;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Socket(String),
}

/// Durable conversation state a turn reads and writes
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Provider and model currently selected, if any
    async fn active_provider(&self) -> DbResult<Option<ProviderConfig>>;

    /// Append a message to a thread
    async fn create_message(
        &self,
        thread_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message>;

    /// Overwrite a message with its final content
    async fn finalize_message(
        &self,
        message_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message>;

    /// All messages of a thread in creation order
    async fn list_messages(&self, thread_id: &str) -> DbResult<Vec<Message>>;

    /// Record the latest activity on a thread
    async fn touch_thread(
        &self,
        thread_id: &str,
        excerpt: &str,
        at: &DateTime<Utc>,
    ) -> DbResult<Thread>;
}

/// A bidirectional client connection carrying text frames
#[async_trait]
pub trait Connection: Send {
    /// Next inbound text frame; `None` once the peer has closed
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Write one fragment to the peer
    async fn send(&mut self, fragment: &Fragment) -> Result<(), TransportError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn active_provider(&self) -> DbResult<Option<ProviderConfig>> {
        (**self).active_provider().await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message> {
        (**self).create_message(thread_id, sender, content, model).await
    }

    async fn finalize_message(
        &self,
        message_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message> {
        (**self)
            .finalize_message(message_id, sender, content, model)
            .await
    }

    async fn list_messages(&self, thread_id: &str) -> DbResult<Vec<Message>> {
        (**self).list_messages(thread_id).await
    }

    async fn touch_thread(
        &self,
        thread_id: &str,
        excerpt: &str,
        at: &DateTime<Utc>,
    ) -> DbResult<Thread> {
        (**self).touch_thread(thread_id, excerpt, at).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a ConversationStore
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
    username: String,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            username: DEFAULT_USERNAME.to_string(),
        }
    }
}

pub(super) fn provider_config(api: ApiConfig, model: String) -> ProviderConfig {
    ProviderConfig {
        api_id: api.id,
        api_name: api.name,
        base_url: api.url,
        api_key: api.api_key,
        model,
    }
}

#[async_trait]
impl ConversationStore for DatabaseStore {
    async fn active_provider(&self) -> DbResult<Option<ProviderConfig>> {
        Ok(self
            .db
            .selected_api(&self.username)?
            .map(|(api, model)| provider_config(api, model)))
    }

    async fn create_message(
        &self,
        thread_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db.add_message(&id, thread_id, sender, content, model)
    }

    async fn finalize_message(
        &self,
        message_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message> {
        self.db.finalize_message(message_id, sender, content, model)
    }

    async fn list_messages(&self, thread_id: &str) -> DbResult<Vec<Message>> {
        self.db.get_messages(thread_id)
    }

    async fn touch_thread(
        &self,
        thread_id: &str,
        excerpt: &str,
        at: &DateTime<Utc>,
    ) -> DbResult<Thread> {
        self.db.touch_thread(thread_id, excerpt, at)
    }
}
