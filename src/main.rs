//! chat-relay - streaming LLM chat over WebSockets
//!
//! Relays chat turns from an htmx front end to any OpenAI-compatible
//! completion endpoint, streaming the reply back as HTML fragments and
//! keeping the conversation in SQLite.

mod api;
mod config;
mod db;
mod llm;
mod presenter;
mod session;

use api::{create_router, AppState};
use config::{DefaultApi, ServerConfig};
use db::{Database, DbResult, DEFAULT_USERNAME};
use llm::{LoggingProvider, OpenAiProvider};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = ServerConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    if let Some(default_api) = &config.default_api {
        seed_default_api(&db, default_api)?;
    }
    if db.selected_api(DEFAULT_USERNAME)?.is_none() {
        tracing::warn!("No API selected. Register one via /api/apis and select it before chatting.");
    }

    let provider = OpenAiProvider::new(config.request_timeout)?;
    let provider = Arc::new(LoggingProvider::new(Arc::new(provider)));

    let state = AppState::new(db, provider, config.stream_idle_timeout);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        stream_idle_timeout_secs = config.stream_idle_timeout.as_secs(),
        "chat-relay listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Register and select the configured provider when none exists yet
fn seed_default_api(db: &Database, default_api: &DefaultApi) -> DbResult<()> {
    if !db.list_apis()?.is_empty() {
        return Ok(());
    }

    let id = uuid::Uuid::new_v4().to_string();
    db.create_api(
        &id,
        &default_api.name,
        &default_api.url,
        &default_api.api_key,
        "",
    )?;
    db.select_api(DEFAULT_USERNAME, &id, &default_api.model)?;
    tracing::info!(
        api_id = %id,
        name = %default_api.name,
        model = %default_api.model,
        "Seeded default API"
    );
    Ok(())
}
