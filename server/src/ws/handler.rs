use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::error::CourierError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// The connecting user identifies itself via ?username=NAME.
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub username: Option<String>,
}

/// GET /chat?username=NAME
/// WebSocket upgrade endpoint. A missing or blank username rejects the
/// handshake before upgrading; nothing is registered and no presence fires.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<ChatQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let username = params
        .username
        .filter(|name| !name.trim().is_empty());

    match username {
        Some(username) => {
            tracing::info!(
                username = %username,
                peer = %peer,
                "WebSocket connection accepted"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, username))
        }
        None => {
            tracing::warn!(
                peer = %peer,
                error = %CourierError::InvalidUsername,
                "WebSocket handshake rejected"
            );
            (StatusCode::BAD_REQUEST, CourierError::InvalidUsername.to_string()).into_response()
        }
    }
}
