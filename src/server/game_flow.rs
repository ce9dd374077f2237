use chrono::Utc;
use std::sync::Arc;
use url::Url;

use crate::protocol::{
    ErrorCode, LobbyError, MemberLocation, Room, RoomStatus, ServerEvent, UserId,
};
use crate::session::SessionMetadata;
use crate::store::LobbyStore;

use super::{retry_once, LobbyServer};

/// Build the recipient-specific launch URL: the session token always rides
/// in `session=`; the room code rides alongside only outside streamer mode.
fn build_game_url(base: &str, token: &str, room_code: Option<&str>) -> Result<String, LobbyError> {
    let mut url = Url::parse(base)
        .map_err(|err| LobbyError::Internal(anyhow::anyhow!("invalid game base url: {err}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("session", token);
        if let Some(code) = room_code {
            query.append_pair("room", code);
        }
    }
    Ok(url.to_string())
}

impl LobbyServer {
    /// `GAME.START`: hand every connected member off to the selected game.
    pub async fn start_game(&self, user_id: UserId, room_code: &str) -> Result<(), LobbyError> {
        let span = tracing::info_span!("game.start", %user_id, %room_code);
        let _span_guard = span.enter();

        let room_guard = self.locks.acquire(room_code).await;

        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;
        if room.host_id != user_id {
            return Err(LobbyError::unauthorized("Only the host can start the game"));
        }
        if room.status != RoomStatus::Lobby {
            return Err(LobbyError::rejected(
                ErrorCode::Validation,
                "The room is not in the lobby",
            ));
        }
        let game_type = room.current_game.clone().ok_or_else(|| {
            LobbyError::validation("Select a game before starting")
        })?;

        let members = self.store().list_members(&room.id).await?;
        let connected: Vec<_> = members.iter().filter(|m| m.is_connected).collect();
        let min_players = self.config().lobby.min_players as usize;
        if connected.len() < min_players {
            return Err(LobbyError::validation(format!(
                "Need at least {min_players} connected players to start"
            )));
        }

        // Mint one token per connected member before committing the
        // transition, so a mint failure leaves the room untouched.
        let player_count = connected.len();
        let base_url = self.config().lobby.game_base_url(&game_type);
        let mut handoffs: Vec<(UserId, ServerEvent)> = Vec::with_capacity(player_count);
        for member in &connected {
            let premium_tier = self
                .store()
                .get_user(&member.user_id)
                .await?
                .map(|profile| profile.premium_tier)
                .unwrap_or_default();
            let is_host = member.user_id == room.host_id;
            let token = self
                .sessions
                .mint(
                    &room.code,
                    member.user_id,
                    &game_type,
                    room.streamer_mode,
                    SessionMetadata {
                        display_name: member.display_name.clone(),
                        is_host,
                        player_count,
                        premium_tier,
                    },
                )
                .await?;

            let wire_room_code = if room.streamer_mode {
                None
            } else {
                Some(room.code.clone())
            };
            let game_url =
                build_game_url(&base_url, &token, wire_room_code.as_deref())?;
            handoffs.push((
                member.user_id,
                ServerEvent::GameStarted {
                    game_url,
                    game_type: game_type.clone(),
                    is_host,
                    room_code: wire_room_code,
                },
            ));
        }

        let started_at = Utc::now();
        retry_once("mark_game_started", || {
            self.store().mark_game_started(&room.id, started_at)
        })
        .await?;
        for member in &connected {
            self.store()
                .set_member_location(&room.id, &member.user_id, MemberLocation::Game)
                .await?;
        }

        self.metrics().increment_games_started();
        self.log_event(
            room.id,
            Some(user_id),
            "game_started",
            serde_json::json!({ "game_type": game_type, "players": player_count }),
        )
        .await;

        // Per-recipient fan-out happens off the critical section.
        drop(room_guard);
        for (recipient, event) in handoffs {
            self.send_to_user(room_code, &recipient, Arc::new(event));
        }

        tracing::info!(room_id = %room.id, %game_type, players = player_count, "Game started");
        Ok(())
    }

    /// The external game reported the session over without returning
    /// players: the room terminates as `Finished`.
    pub(crate) async fn finish_room(&self, room: &Room) -> Result<(), LobbyError> {
        if room.status != RoomStatus::InGame && room.status != RoomStatus::Returning {
            return Err(LobbyError::validation("The room has no game in progress"));
        }
        retry_once("finish_room", || {
            self.store().set_room_status(&room.id, RoomStatus::Finished)
        })
        .await?;
        self.cancel_host_grace_timer(&room.id);
        self.returns.forget_room(&room.id);
        self.metrics().increment_games_finished();
        self.log_event(room.id, None, "game_finished", serde_json::json!({}))
            .await;
        tracing::info!(room_id = %room.id, room_code = %room.code, "Room finished");
        Ok(())
    }
}
