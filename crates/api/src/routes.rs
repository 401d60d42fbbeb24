use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use chat::{Coordinator, Response, TranscriptEntry};

use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};
use crate::sessions::SessionStore;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub configured: bool,
}

pub struct AppState {
    pub coordinator: Coordinator,
    pub sessions: SessionStore,
    pub metrics: Metrics,
    pub primary: ProviderStatus,
    pub secondary: ProviderStatus,
    pub tertiary: ProviderStatus,
    pub model_classes: usize,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> HttpResponse {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct ChatRequest {
    session_id: Option<Uuid>,
    message: String,
}

#[derive(Serialize)]
struct ChatReply {
    session_id: Uuid,
    /// Rendered text shown to the user.
    reply: String,
    response: Response,
}

#[derive(Serialize)]
struct TranscriptResponse {
    session_id: Uuid,
    entries: Vec<TranscriptEntry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    primary: ProviderStatus,
    secondary: ProviderStatus,
    tertiary: ProviderStatus,
    model_classes: usize,
    sessions: usize,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(handle_chat))
        .route("/sessions/:id/transcript", get(get_transcript))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let session_id = req.session_id.unwrap_or_else(Uuid::new_v4);
    state.sessions.append_user(session_id, message);

    let timer = TimedOperation::start();
    let response = state.coordinator.handle(message).await;
    state.metrics.record(&response, timer.elapsed());

    let reply = response.render();
    state.sessions.append_assistant(session_id, &reply);

    info!(
        session = %session_id,
        kind = response.kind(),
        elapsed_ms = timer.elapsed().as_millis() as u64,
        "Chat turn complete"
    );

    Ok(Json(ChatReply {
        session_id,
        reply,
        response,
    }))
}

async fn get_transcript(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let entries = state
        .sessions
        .transcript(&session_id)
        .ok_or(ApiError::SessionNotFound(session_id))?;

    Ok(Json(TranscriptResponse { session_id, entries }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    // Configuration-level only; no provider is called
    let all_configured = [&state.primary, &state.secondary, &state.tertiary]
        .iter()
        .all(|p| p.configured);

    Json(HealthResponse {
        status: if all_configured { "ok" } else { "degraded" },
        primary: state.primary.clone(),
        secondary: state.secondary.clone(),
        tertiary: state.tertiary.clone(),
        model_classes: state.model_classes,
        sessions: state.sessions.len(),
    })
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
