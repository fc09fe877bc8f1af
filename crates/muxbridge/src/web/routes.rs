use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::sync::Arc;

use muxbridge_control::{BridgeError, PtyBridge, SessionRegistry, TmuxCli, TmuxSpawner};
use muxbridge_types::SessionSummary;

use crate::config::AppConfig;
use crate::web::{control_socket, terminal_socket};

/// Application state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub pty: PtyBridge,
    pub tmux: TmuxCli,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let tmux = TmuxCli::new(config.tmux_binary.clone());
        let registry = SessionRegistry::new(
            Arc::new(TmuxSpawner::new(config.tmux_binary.clone())),
            config.control_config(),
        );
        let pty = PtyBridge::new(tmux.clone(), config.pty_grace());
        Self {
            registry,
            pty,
            tmux,
            config: Arc::new(config),
        }
    }

    /// Destroy every control session and plain terminal.
    pub fn shutdown(&self) {
        self.registry.shutdown();
        self.pty.shutdown();
    }
}

/// Create router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // API routes
        .route("/health", get(health))
        .route("/api/control-sessions", get(list_control_sessions))
        .route("/api/sessions/:session/copy-mode", get(copy_mode))
        // WebSocket endpoints
        .route("/ws/control/:session", get(control_handler))
        .route("/ws/terminal/:session", get(terminal_handler))
        .with_state(state)
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /api/control-sessions - Live control sessions
async fn list_control_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.list())
}

/// GET /api/sessions/:session/copy-mode - Whether the active pane is scrolled back
async fn copy_mode(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.tmux.has_session(&session).await {
        return Err(AppError::NotFound(format!("Session '{}' not found", session)));
    }
    let in_copy_mode = state.tmux.in_copy_mode(&session).await?;
    Ok(Json(serde_json::json!({
        "session": session,
        "inCopyMode": in_copy_mode,
    })))
}

/// GET /ws/control/:session - Multi-pane control-mode WebSocket
async fn control_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| control_socket::handle_socket(socket, state, session))
}

/// GET /ws/terminal/:session - Single full-screen terminal WebSocket
async fn terminal_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| terminal_socket::handle_socket(socket, state, session))
}

/// Error handling
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Bridge(BridgeError),
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        AppError::Bridge(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Bridge(BridgeError::SessionNotFound(name)) => {
                (StatusCode::NOT_FOUND, format!("Session '{}' not found", name))
            }
            AppError::Bridge(BridgeError::Timeout(ms)) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("tmux did not answer within {}ms", ms),
            ),
            AppError::Bridge(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
