//! HTTP request handlers

use super::assets::get_index_html;
use super::sse::turn_sse;
use super::types::{
    ChatRequest, ErrorResponse, ModelsResponse, NewThreadResponse, ThreadListResponse,
    ThreadMessagesResponse,
};
use super::AppState;
use crate::runtime::GraphError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Root serves the chat page
        .route("/", get(serve_index))
        // Threads
        .route("/api/threads", get(list_threads).post(create_thread))
        .route("/api/threads/:id/messages", get(get_messages))
        // One turn, streamed back as SSE
        .route("/api/threads/:id/chat", post(send_chat))
        // Model info
        .route("/api/models", get(list_models))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

async fn serve_index() -> impl IntoResponse {
    match get_index_html() {
        Some(content) => Html(content).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Html("<h1>404 - UI not found</h1>".to_string()),
        )
            .into_response(),
    }
}

// ============================================================
// Threads
// ============================================================

async fn create_thread(State(state): State<AppState>) -> Result<Json<NewThreadResponse>, AppError> {
    let thread_id = state.engine.start_new_thread().await?;
    Ok(Json(NewThreadResponse { thread_id }))
}

async fn list_threads(State(state): State<AppState>) -> Result<Json<ThreadListResponse>, AppError> {
    let threads = state.engine.list_threads().await?;
    Ok(Json(ThreadListResponse { threads }))
}

/// Unknown ids answer with an empty history rather than 404
async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadMessagesResponse>, AppError> {
    let messages = state.engine.load_thread_history(&id).await?;
    Ok(Json(ThreadMessagesResponse {
        busy: state.engine.is_busy(&id),
        thread_id: id,
        messages,
    }))
}

// ============================================================
// Chat
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text is empty".to_string()));
    }
    if !state.has_credentials() {
        return Err(AppError::ServiceUnavailable(
            "Model credentials required: set GOOGLE_API_KEY".to_string(),
        ));
    }

    tracing::info!(
        thread_id = %id,
        model = %state.engine.model_id(),
        chars = req.text.len(),
        "Chat message received"
    );
    let turn = state.engine.run(&id, req.text);
    Ok(turn_sse(turn).into_response())
}

// ============================================================
// Model Info
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.llm_registry.available_model_info(),
        default: state.llm_registry.default_model_id().to_string(),
        credentials: state.has_credentials(),
    })
}

async fn get_version() -> &'static str {
    concat!("chatgemini ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl From<GraphError> for AppError {
    fn from(e: GraphError) -> Self {
        tracing::error!(error = %e, "Request failed");
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
