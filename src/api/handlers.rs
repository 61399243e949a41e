//! HTTP request handlers

use super::types::{
    ApiListResponse, ApiResponse, CreateApiRequest, CreateThreadRequest, ErrorResponse,
    SelectionRequest, SettingsResponse, ThreadListResponse, ThreadMessagesResponse,
    ThreadResponse, UsefulResponse,
};
use super::ws::WsConnection;
use super::AppState;
use crate::db::{DbError, DEFAULT_USERNAME};
use crate::session::SessionLoop;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Streaming chat
        .route("/ws", get(chat_socket))
        // Threads
        .route("/api/threads", get(list_threads).post(create_thread))
        .route("/api/threads/:id/messages", get(get_thread_messages))
        // Provider configuration
        .route("/api/apis", get(list_apis).post(create_api))
        .route("/api/settings/selection", put(select_api))
        // Feedback
        .route("/api/messages/:id/useful", post(toggle_useful))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Chat Socket
// ============================================================

async fn chat_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_session(socket, state))
}

async fn serve_session(socket: WebSocket, state: AppState) {
    let cancel = CancellationToken::new();
    let (sink, stream) = socket.split();
    let (mut conn, reader) = WsConnection::new(sink, stream, cancel.clone());

    tracing::info!("Chat session started");
    let session = SessionLoop::new(
        state.store.clone(),
        state.provider.clone(),
        state.presenter.clone(),
        state.stream_idle_timeout,
        cancel.clone(),
    );
    let summary = session.run(&mut conn).await;

    cancel.cancel();
    reader.abort();
    conn.close().await;
    tracing::info!(
        turns = summary.turns,
        failures = summary.failures,
        "Chat session ended"
    );
}

// ============================================================
// Threads
// ============================================================

async fn list_threads(
    State(state): State<AppState>,
) -> Result<Json<ThreadListResponse>, AppError> {
    let threads = state.db.list_threads()?;
    Ok(Json(ThreadListResponse { threads }))
}

async fn create_thread(
    State(state): State<AppState>,
    body: Option<Json<CreateThreadRequest>>,
) -> Result<Json<ThreadResponse>, AppError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let id = uuid::Uuid::new_v4().to_string();
    let thread = state.db.create_thread(&id, request.title.trim())?;
    tracing::info!(thread_id = %thread.id, "Thread created");
    Ok(Json(ThreadResponse { thread }))
}

async fn get_thread_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadMessagesResponse>, AppError> {
    let thread = state.db.get_thread(&id)?;
    let messages = state.db.get_messages(&id)?;
    Ok(Json(ThreadMessagesResponse { thread, messages }))
}

// ============================================================
// Provider Configuration
// ============================================================

async fn list_apis(State(state): State<AppState>) -> Result<Json<ApiListResponse>, AppError> {
    let apis = state.db.list_apis()?;
    let settings = state.db.user_settings(DEFAULT_USERNAME)?;
    Ok(Json(ApiListResponse { apis, settings }))
}

async fn create_api(
    State(state): State<AppState>,
    Json(request): Json<CreateApiRequest>,
) -> Result<Json<ApiResponse>, AppError> {
    let name = request.name.trim();
    let url = request.url.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("API name is required".to_string()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::BadRequest(
            "API url must start with http:// or https://".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let api = state
        .db
        .create_api(&id, name, url, &request.api_key, &request.color)?;
    tracing::info!(api_id = %api.id, name = %api.name, "API registered");
    Ok(Json(ApiResponse { api }))
}

async fn select_api(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> Result<Json<SettingsResponse>, AppError> {
    let settings = state.db.select_api(
        DEFAULT_USERNAME,
        &request.api_id,
        request.model_name.trim(),
    )?;
    tracing::info!(
        api_id = %request.api_id,
        model = %settings.selected_model_name,
        "Selection updated"
    );
    Ok(Json(SettingsResponse { settings }))
}

// ============================================================
// Feedback
// ============================================================

async fn toggle_useful(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UsefulResponse>, AppError> {
    let useful = state.db.toggle_useful(&id)?;
    Ok(Json(UsefulResponse {
        message_id: id,
        useful,
    }))
}

async fn get_version() -> &'static str {
    concat!("chat-relay ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::ThreadNotFound(_) | DbError::MessageNotFound(_) | DbError::ApiNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            DbError::Sqlite(_) => {
                tracing::error!(error = %e, "Database failure");
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
