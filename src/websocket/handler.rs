use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use std::net::SocketAddr;

use super::connection::handle_socket;
use super::routes::AppState;

/// WebSocket upgrade handler for the lobby protocol.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let server = state.server;
    ws.on_upgrade(move |socket| handle_socket(socket, server, addr))
}
