//! API request and response types

use crate::db::{ApiConfig, Message, Thread, UserSettings};
use serde::{Deserialize, Serialize};

/// Request to create a new thread
#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub title: String,
}

/// Request to register a provider endpoint
#[derive(Debug, Deserialize)]
pub struct CreateApiRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub color: String,
}

/// Request to choose the provider and model used for new turns
#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub api_id: String,
    #[serde(default)]
    pub model_name: String,
}

/// Response with a list of threads
#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<Thread>,
}

/// Response with a single thread
#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread: Thread,
}

/// Response with a thread and its messages
#[derive(Debug, Serialize)]
pub struct ThreadMessagesResponse {
    pub thread: Thread,
    pub messages: Vec<Message>,
}

/// Response with configured providers and the current selection
#[derive(Debug, Serialize)]
pub struct ApiListResponse {
    pub apis: Vec<ApiConfig>,
    pub settings: UserSettings,
}

/// Response with a single provider
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub api: ApiConfig,
}

/// Response with the user's selection
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub settings: UserSettings,
}

/// Response for the usefulness toggle
#[derive(Debug, Serialize)]
pub struct UsefulResponse {
    pub message_id: String,
    pub useful: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
