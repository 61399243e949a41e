//! Server configuration from the environment

use std::time::Duration;

const DEFAULT_PORT: u16 = 8090;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Provider to register on first start so a fresh install can chat right away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultApi {
    pub name: String,
    pub url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub db_path: String,
    pub port: u16,
    /// Longest wait for the provider's next piece of output
    pub stream_idle_timeout: Duration,
    /// Connect timeout for provider HTTP requests
    pub request_timeout: Duration,
    pub default_api: Option<DefaultApi>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("CHAT_RELAY_DB_PATH").unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.chat-relay/chat.db")
        });

        let port = var("CHAT_RELAY_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let secs = |key: &str, default: u64| {
            var(key)
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(default)
        };

        let default_api = var("CHAT_RELAY_DEFAULT_API_URL")
            .filter(|url| !url.is_empty())
            .map(|url| DefaultApi {
                name: var("CHAT_RELAY_DEFAULT_API_NAME").unwrap_or_else(|| "default".to_string()),
                url,
                api_key: var("CHAT_RELAY_DEFAULT_API_KEY").unwrap_or_default(),
                model: var("CHAT_RELAY_DEFAULT_MODEL").unwrap_or_default(),
            });

        Self {
            db_path,
            port,
            stream_idle_timeout: Duration::from_secs(secs(
                "CHAT_RELAY_STREAM_IDLE_TIMEOUT_SECS",
                DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            )),
            request_timeout: Duration::from_secs(secs(
                "CHAT_RELAY_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            default_api,
        }
    }
}
