use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

use crate::chat::presence;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /api/health: liveness plus registry counters.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "connections": state.connections.connection_count(),
        "online": state.connections.snapshot_usernames().len(),
    }))
}

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", get(ws_handler::ws_upgrade))
        .route("/api/presence", get(presence::get_presence))
        .route("/api/health", get(health))
        .with_state(state)
}
