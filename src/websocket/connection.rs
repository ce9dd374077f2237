use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ConnId, ErrorCode, OutboundFrame, ServerEvent, UserId};
use crate::rate_limit::MessageRateLimiter;
use crate::server::LobbyServer;

pub(super) async fn handle_socket(socket: WebSocket, server: Arc<LobbyServer>, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let ws_config = server.config().websocket.clone();
    let conn_id: ConnId = Uuid::new_v4();

    let (tx, mut rx) = mpsc::channel::<Arc<ServerEvent>>(ws_config.outbound_queue_capacity.max(1));
    server.register_channel(conn_id, tx.clone());
    tracing::info!(%conn_id, client_addr = %addr, "WebSocket connection established");

    // Outbound task: every frame carries an ascending per-connection seq,
    // and frames are written in queue order, so a connection never observes
    // reordered broadcasts.
    let send_task = tokio::spawn(async move {
        let mut seq: u64 = 0;
        while let Some(event) = rx.recv().await {
            seq += 1;
            let frame = OutboundFrame {
                seq,
                event: &*event,
            };
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(%conn_id, error = %err, "Failed to serialize outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound task: identify-first, then translate intents.
    let recv_server = Arc::clone(&server);
    let receive_task = tokio::spawn(async move {
        let server = recv_server;
        let mut identity: Option<UserId> = None;
        let mut limiter = MessageRateLimiter::new(ws_config.max_messages_per_second);
        let identify_deadline =
            Instant::now() + Duration::from_secs(ws_config.identify_timeout_secs);

        loop {
            let msg = if identity.is_some() {
                match stream.next().await {
                    Some(msg) => msg,
                    None => break,
                }
            } else {
                // Unidentified connections get a bounded wait.
                tokio::select! {
                    msg_opt = stream.next() => match msg_opt {
                        Some(msg) => msg,
                        None => break,
                    },
                    () = tokio::time::sleep_until(identify_deadline) => {
                        tracing::warn!(%conn_id, "Identify timeout, closing connection");
                        send_error(&server, &conn_id, "Identify within the allowed time", ErrorCode::Unauthorized);
                        break;
                    }
                }
            };

            let msg = match msg {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::warn!(%conn_id, error = %err, "WebSocket error");
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    if text.len() > ws_config.max_message_size {
                        tracing::warn!(
                            %conn_id,
                            size = text.len(),
                            max = ws_config.max_message_size,
                            "Frame exceeds size limit"
                        );
                        send_error(&server, &conn_id, "Message too large", ErrorCode::Validation);
                        continue;
                    }

                    if !limiter.allow() {
                        server.metrics().increment_messages_rate_limited();
                        send_error(
                            &server,
                            &conn_id,
                            "Message rate ceiling exceeded, slow down",
                            ErrorCode::Forbidden,
                        );
                        continue;
                    }

                    // Parse failures drop the frame; they never reach the room.
                    let message: ClientMessage = match serde_json::from_str(&text) {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::debug!(%conn_id, error = %err, "Dropping unparseable frame");
                            send_error(
                                &server,
                                &conn_id,
                                "Malformed message",
                                ErrorCode::Validation,
                            );
                            continue;
                        }
                    };

                    let Some(user_id) = identity else {
                        match message {
                            ClientMessage::Identify { user_id } => {
                                identity = Some(user_id);
                                tracing::info!(%conn_id, %user_id, "Connection identified");
                            }
                            _ => {
                                tracing::warn!(%conn_id, "Message before USER.IDENTIFY");
                                send_error(
                                    &server,
                                    &conn_id,
                                    "Identify before sending lobby messages",
                                    ErrorCode::Unauthorized,
                                );
                                break;
                            }
                        }
                        continue;
                    };
                    server.handle_client_message(conn_id, user_id, message).await;
                }
                Message::Close(_) => {
                    tracing::info!(%conn_id, "WebSocket connection closed");
                    break;
                }
                Message::Pong(_) => {
                    server.handle_heartbeat(conn_id).await;
                }
                _ => {
                    // Binary and ping frames are ignored on this protocol.
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = receive_task => {}
    }

    // Teardown: drop the channel first so no further frames queue, then run
    // the member-disconnect pipeline.
    server.remove_channel(&conn_id);
    server.on_conn_closed(conn_id).await;
    tracing::info!(%conn_id, "WebSocket connection torn down");
}

fn send_error(server: &LobbyServer, conn_id: &ConnId, message: &str, code: ErrorCode) {
    server.send_error_to_conn(
        conn_id,
        &crate::protocol::LobbyError::rejected(code, message),
    );
}
