//! HTTP surface and router assembly.

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use rattan_core::METHODS;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws::ws_handler;

/// Build the full axum router: health probes, status, capability docs and
/// the `/ws` upgrade.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/docs", get(docs))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend_ready": state.bridge.is_ready(),
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
        "connections": state.connections.count(),
        "sessions": state.sessions.session_count(),
        "channels": state.adapters.adapter_ids(),
        "backend": state.bridge.status(),
    }))
}

async fn docs() -> Json<Value> {
    Json(json!({
        "name": "rattan",
        "description": "local-first message gateway",
        "websocket": "/ws",
        "frames": ["connect", "request", "response", "event"],
        "methods": METHODS,
    }))
}
