use crate::decision::ProcessedUpdate;
use crate::telemetry::SourceMode;
use crate::ws::broadcaster::BroadcasterHandle;
use crate::ws::connection::handle_connection;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub broadcaster: BroadcasterHandle,
    pub source_mode: watch::Receiver<SourceMode>,
    pub max_connections: usize,
}

impl AppState {
    pub fn new(
        broadcaster: BroadcasterHandle,
        source_mode: watch::Receiver<SourceMode>,
        max_connections: usize,
    ) -> Self {
        Self {
            broadcaster,
            source_mode,
            max_connections,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/cells", get(list_cells))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle WebSocket upgrade request
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Result<Response, StatusCode> {
    let connected = state.broadcaster.subscriber_count();
    if connected >= state.max_connections {
        warn!(
            connected,
            max = state.max_connections,
            "rejecting WebSocket upgrade, connection limit reached"
        );
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let broadcaster = state.broadcaster.clone();
    Ok(ws.on_upgrade(move |socket: WebSocket| handle_connection(socket, broadcaster)))
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub source: SourceMode,
    pub subscribers: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        source: *state.source_mode.borrow(),
        subscribers: state.broadcaster.subscriber_count(),
    })
}

/// Latest known update for every cell
pub async fn list_cells(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProcessedUpdate>>, StatusCode> {
    state.broadcaster.snapshot().await.map(Json).map_err(|e| {
        error!("Snapshot unavailable: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })
}
