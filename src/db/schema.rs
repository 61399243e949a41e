//! Database schema and record types

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Username the single-user deployment stores its selection under
pub const DEFAULT_USERNAME: &str = "default";

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    selected_api TEXT,
    selected_model_name TEXT NOT NULL DEFAULT ''
);

INSERT OR IGNORE INTO users (username) VALUES ('default');

CREATE TABLE IF NOT EXISTS apis (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    api_key TEXT NOT NULL DEFAULT '',
    color TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    last_message TEXT NOT NULL DEFAULT '',
    last_message_timestamp TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_last_message ON threads(last_message_timestamp DESC);

CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    sender TEXT NOT NULL,
    content TEXT NOT NULL,
    model TEXT NOT NULL DEFAULT '',
    useful BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, sequence_id);
";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Human,
    Model,
    System,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::Human => "human",
            Sender::Model => "model",
            Sender::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "human" => Sender::Human,
            "model" => Sender::Model,
            _ => Sender::System,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub thread_id: String,
    pub sequence_id: i64,
    pub sender: Sender,
    pub content: String,
    /// Model label the message was produced for; empty on the streaming placeholder
    pub model: String,
    pub useful: bool,
    pub created_at: DateTime<Utc>,
}

/// Conversation thread metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub last_message: String,
    pub last_message_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A configured OpenAI-compatible endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted provider/model selection for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub username: String,
    pub selected_api: Option<String>,
    pub selected_model_name: String,
}

/// Format a timestamp for storage.
///
/// Fixed-width UTC with microseconds so stored values order lexicographically.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at storage precision
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(super) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
