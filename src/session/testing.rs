//! Mock implementations for testing sessions

use super::traits::{Connection, ConversationStore, TransportError};
use crate::db::{DbError, DbResult, Message, Sender, Thread};
use crate::llm::{
    CompletionProvider, CompletionRequest, CompletionStream, LlmError, ProviderConfig,
    StreamChunk,
};
use crate::presenter::{Fragment, Presenter, RenderError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::{stream, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Mutex;

pub fn test_provider() -> ProviderConfig {
    ProviderConfig {
        api_id: "api-1".to_string(),
        api_name: "groq".to_string(),
        base_url: "https://api.groq.com/openai/v1".to_string(),
        api_key: "sk-test".to_string(),
        model: "llama3-8b".to_string(),
    }
}

// ============================================================================
// Store
// ============================================================================

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ActiveProvider,
    CreateMessage,
    FinalizeMessage,
    ListMessages,
    TouchThread,
}

struct StoreState {
    provider: Option<ProviderConfig>,
    threads: HashMap<String, Thread>,
    messages: Vec<Message>,
    failing: HashSet<StoreOp>,
    clock: DateTime<Utc>,
    next_id: u64,
}

/// In-memory conversation store for testing
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                provider: None,
                threads: HashMap::new(),
                messages: Vec::new(),
                failing: HashSet::new(),
                clock: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                next_id: 0,
            }),
        }
    }

    pub fn with_thread(self, id: &str) -> Self {
        let created_at = self.state.lock().unwrap().clock;
        self.state.lock().unwrap().threads.insert(
            id.to_string(),
            Thread {
                id: id.to_string(),
                title: String::new(),
                last_message: String::new(),
                last_message_timestamp: None,
                created_at,
            },
        );
        self
    }

    /// Mark a thread as active at `at`, as if another turn had touched it
    pub fn with_last_activity(self, id: &str, at: DateTime<Utc>) -> Self {
        if let Some(thread) = self.state.lock().unwrap().threads.get_mut(id) {
            thread.last_message_timestamp = Some(at);
        }
        self
    }

    pub fn with_provider(self, provider: ProviderConfig) -> Self {
        self.state.lock().unwrap().provider = Some(provider);
        self
    }

    pub fn fail_on(&self, op: StoreOp) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn heal(&self, op: StoreOp) {
        self.state.lock().unwrap().failing.remove(&op);
    }

    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect()
    }

    pub fn thread(&self, id: &str) -> Option<Thread> {
        self.state.lock().unwrap().threads.get(id).cloned()
    }

    fn check(state: &StoreState, op: StoreOp) -> DbResult<()> {
        if state.failing.contains(&op) {
            Err(DbError::Sqlite(rusqlite::Error::InvalidQuery))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn active_provider(&self) -> DbResult<Option<ProviderConfig>> {
        let state = self.state.lock().unwrap();
        Self::check(&state, StoreOp::ActiveProvider)?;
        Ok(state.provider.clone())
    }

    async fn create_message(
        &self,
        thread_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, StoreOp::CreateMessage)?;
        if !state.threads.contains_key(thread_id) {
            return Err(DbError::ThreadNotFound(thread_id.to_string()));
        }

        state.next_id += 1;
        state.clock += Duration::milliseconds(1);
        let sequence_id = state
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .count() as i64
            + 1;
        let message = Message {
            message_id: format!("msg-{}", state.next_id),
            thread_id: thread_id.to_string(),
            sequence_id,
            sender,
            content: content.to_string(),
            model: model.to_string(),
            useful: false,
            created_at: state.clock,
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn finalize_message(
        &self,
        message_id: &str,
        sender: Sender,
        content: &str,
        model: &str,
    ) -> DbResult<Message> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, StoreOp::FinalizeMessage)?;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
            .ok_or_else(|| DbError::MessageNotFound(message_id.to_string()))?;
        message.sender = sender;
        message.content = content.to_string();
        message.model = model.to_string();
        Ok(message.clone())
    }

    async fn list_messages(&self, thread_id: &str) -> DbResult<Vec<Message>> {
        {
            let state = self.state.lock().unwrap();
            Self::check(&state, StoreOp::ListMessages)?;
        }
        Ok(self.messages(thread_id))
    }

    async fn touch_thread(
        &self,
        thread_id: &str,
        excerpt: &str,
        at: &DateTime<Utc>,
    ) -> DbResult<Thread> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, StoreOp::TouchThread)?;
        let thread = state
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| DbError::ThreadNotFound(thread_id.to_string()))?;
        thread.last_message = excerpt.to_string();
        thread.last_message_timestamp = Some(match thread.last_message_timestamp {
            Some(prev) if prev > *at => prev,
            _ => *at,
        });
        Ok(thread.clone())
    }
}

// ============================================================================
// Provider
// ============================================================================

/// What the scripted provider does for one request
pub enum Script {
    /// Yield these items, then end the stream
    Chunks(Vec<Result<StreamChunk, LlmError>>),
    /// Fail to open
    OpenError(LlmError),
    /// Yield these deltas, then go silent forever
    Stall(Vec<&'static str>),
}

/// Completion provider that replays queued scripts in order
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    pub fn reply(self, deltas: &[&str]) -> Self {
        let chunks = deltas.iter().map(|d| Ok(StreamChunk::new(*d))).collect();
        self.then(Script::Chunks(chunks))
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::OpenError(LlmError::unknown("no scripted response")));

        match script {
            Script::Chunks(items) => Ok(Box::pin(stream::iter(items))),
            Script::OpenError(e) => Err(e),
            Script::Stall(deltas) => {
                let items: Vec<_> = deltas.into_iter().map(|d| Ok(StreamChunk::new(d))).collect();
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            }
        }
    }
}

// ============================================================================
// Presenter
// ============================================================================

/// Presenter producing short plain-text fragments that are easy to assert on
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainPresenter {
    fail_chunks: bool,
    fail_errors: bool,
}

impl PlainPresenter {
    pub fn failing_chunks() -> Self {
        Self {
            fail_chunks: true,
            ..Self::default()
        }
    }

    pub fn failing_errors() -> Self {
        Self {
            fail_errors: true,
            ..Self::default()
        }
    }
}

impl Presenter for PlainPresenter {
    fn skeleton(
        &self,
        message_id: &str,
        user_text: &str,
        model_label: &str,
    ) -> Result<Fragment, RenderError> {
        Ok(Fragment::new(format!(
            "skeleton:{message_id}:{user_text}:{model_label}"
        )))
    }

    fn chunk(&self, message_id: &str, delta: &str) -> Result<Fragment, RenderError> {
        if self.fail_chunks {
            return Err(RenderError::Format(fmt::Error));
        }
        Ok(Fragment::new(format!("chunk:{message_id}:{delta}")))
    }

    fn last_message_timestamp(
        &self,
        thread_id: &str,
        at: &DateTime<Utc>,
    ) -> Result<Fragment, RenderError> {
        Ok(Fragment::new(format!("timestamp:{thread_id}:{}", at.to_rfc3339())))
    }

    fn error(&self, message: &str) -> Result<Fragment, RenderError> {
        if self.fail_errors {
            return Err(RenderError::Format(fmt::Error));
        }
        Ok(Fragment::new(format!("error:{message}")))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Connection fed from a fixed list of inbound frames
pub struct MockConnection {
    inbound: VecDeque<Result<Option<String>, TransportError>>,
    sent: Vec<Fragment>,
    fail_sends: bool,
}

impl MockConnection {
    /// Inbound frames are read in order, then the peer closes
    pub fn new(frames: Vec<&str>) -> Self {
        Self {
            inbound: frames.into_iter().map(|f| Ok(Some(f.to_string()))).collect(),
            sent: Vec::new(),
            fail_sends: false,
        }
    }

    /// End with a read failure instead of a clean close
    pub fn then_read_error(mut self) -> Self {
        self.inbound
            .push_back(Err(TransportError::Socket("connection reset".to_string())));
        self
    }

    pub fn fail_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.iter().map(|f| f.as_str().to_string()).collect()
    }

    pub fn remaining_reads(&self) -> usize {
        self.inbound.len()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        self.inbound.pop_front().unwrap_or(Ok(None))
    }

    async fn send(&mut self, fragment: &Fragment) -> Result<(), TransportError> {
        if self.fail_sends {
            return Err(TransportError::Socket("broken pipe".to_string()));
        }
        self.sent.push(fragment.clone());
        Ok(())
    }
}

/// Inbound frame for a turn on `thread_id`
pub fn frame(thread_id: &str, text: &str) -> String {
    serde_json::json!({
        "HEADERS": { "HX-Request": "true" },
        "thread-id-chat": thread_id,
        "new-message": text,
    })
    .to_string()
}
