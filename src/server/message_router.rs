use std::time::Duration;

use crate::protocol::{ClientMessage, ConnId, LobbyError, RoomOptions, UserId};

use super::LobbyServer;

/// Deadline wrapped around every inbound intent; a transition that cannot
/// finish within it surfaces as `Internal` instead of wedging the connection.
const REQUEST_DEADLINE: Duration = Duration::from_secs(10);

impl LobbyServer {
    /// Translate one wire intent into a manager call. Failures surface as a
    /// single `ERROR` frame to the originating connection; the room is not
    /// disturbed.
    pub async fn handle_client_message(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        message: ClientMessage,
    ) {
        let result = match tokio::time::timeout(
            REQUEST_DEADLINE,
            self.dispatch(conn_id, user_id, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LobbyError::Internal(anyhow::anyhow!(
                "request deadline exceeded"
            ))),
        };
        if let Err(error) = result {
            if matches!(error, LobbyError::Internal(_)) {
                tracing::error!(%conn_id, %user_id, error = %error, "Operation failed");
            }
            self.send_error_to_conn(&conn_id, &error);
        }
    }

    async fn dispatch(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        message: ClientMessage,
    ) -> Result<(), LobbyError> {
        match message {
            ClientMessage::Identify { .. } => Err(LobbyError::validation(
                "Connection is already identified",
            )),
            ClientMessage::CreateRoom {
                player_name,
                game_type,
                max_players,
                is_public,
                streamer_mode,
            } => {
                self.create_room(
                    conn_id,
                    user_id,
                    player_name,
                    RoomOptions {
                        game_type,
                        max_players,
                        is_public,
                        streamer_mode,
                    },
                )
                .await
            }
            ClientMessage::JoinRoom {
                room_code,
                player_name,
            } => {
                self.join_room(conn_id, user_id, room_code, player_name)
                    .await
            }
            ClientMessage::LeaveRoom { room_code } => {
                self.leave_room(user_id, &normalize(&room_code)).await
            }
            ClientMessage::ToggleReady { room_code } => {
                self.toggle_ready(user_id, &normalize(&room_code)).await
            }
            ClientMessage::TransferHost {
                room_code,
                target_player_id,
            } => {
                self.transfer_host(user_id, &normalize(&room_code), target_player_id)
                    .await
            }
            ClientMessage::Kick {
                room_code,
                target_player_id,
                reason,
            } => {
                self.kick(user_id, &normalize(&room_code), target_player_id, reason)
                    .await
            }
            ClientMessage::SelectGame {
                game_type,
                settings,
            } => {
                // Game selection addresses the room the connection sits in.
                let room_code = self.bound_room(&conn_id)?;
                self.select_game(user_id, &room_code, game_type, settings)
                    .await
            }
            ClientMessage::StartGame { room_code } => {
                self.start_game(user_id, &normalize(&room_code)).await
            }
            ClientMessage::Chat { message, .. } => {
                let room_code = self.bound_room(&conn_id)?;
                self.chat(user_id, &room_code, message).await
            }
            ClientMessage::Heartbeat {} => {
                self.handle_heartbeat(conn_id).await;
                Ok(())
            }
        }
    }

    fn bound_room(&self, conn_id: &ConnId) -> Result<String, LobbyError> {
        self.registry
            .get(conn_id)
            .map(|(_, room_code)| room_code)
            .ok_or_else(|| LobbyError::unauthorized("Join a room first"))
    }
}

fn normalize(room_code: &str) -> String {
    room_code.trim().to_ascii_uppercase()
}
