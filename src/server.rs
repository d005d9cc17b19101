//! HTTP surface for the coach (`coach serve`).
//!
//! The server owns one worker. It starts initializing as soon as the
//! server binds, so `/ask` answers `not_ready` until `/status` reports
//! `ready`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check (returns version) |
//! | `GET`  | `/status` | Worker state |
//! | `POST` | `/ask` | `{"text": "..."}` → answer payload |
//! | `POST` | `/reset` | Clear cache and index, then re-initialize |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "The model is not ready yet" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_ready` (503),
//! `embedding_failed` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! served from elsewhere can call the API.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use trail_coach_core::models::KnowledgeEntry;
use trail_coach_core::responder::Response as CoachResponse;
use trail_coach_core::CoachError;

use crate::config::Config;
use crate::knowledge::load_knowledge_base;
use crate::progress::{spawn_event_renderer, ProgressMode};
use crate::worker::{self, Coach, CoachHandle};

#[derive(Clone)]
struct AppState {
    coach: CoachHandle,
    /// Re-sent to the worker after every reset.
    knowledge_base: Arc<Vec<KnowledgeEntry>>,
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let knowledge_base = load_knowledge_base(&config.knowledge.path)?;
    let coach = Coach::from_config(config).await?;
    let (handle, events) = worker::spawn(coach);
    spawn_event_renderer(events, ProgressMode::default_for_tty());
    handle.start(knowledge_base.clone())?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "coach server listening");
    axum::serve(listener, router(handle, knowledge_base)).await?;

    Ok(())
}

/// Build the router for an already spawned worker.
pub fn router(coach: CoachHandle, knowledge_base: Vec<KnowledgeEntry>) -> Router {
    let state = AppState {
        coach,
        knowledge_base: Arc::new(knowledge_base),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/ask", post(handle_ask))
        .route("/reset", post(handle_reset))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<CoachError> for AppError {
    fn from(err: CoachError) -> Self {
        let (status, code) = match &err {
            CoachError::ModelNotReady | CoachError::Busy(_) | CoachError::Cancelled(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
            }
            CoachError::Embedding { .. } => (StatusCode::BAD_GATEWAY, "embedding_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    entries: usize,
}

fn status_of(state: &AppState) -> StatusResponse {
    let current = state.coach.state();
    let message = match &current {
        worker::CoachState::Error(message) => Some(message.clone()),
        _ => None,
    };
    StatusResponse {
        state: current.as_str(),
        message,
        entries: state.knowledge_base.len(),
    }
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(status_of(&state))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    text: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<CoachResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let response = state.coach.ask(text).await?;
    Ok(Json(response))
}

// ============ POST /reset ============

async fn handle_reset(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    state.coach.reset().await?;
    state.coach.start(state.knowledge_base.as_ref().clone())?;
    Ok(Json(status_of(&state)))
}
