use serde::Deserialize;
use std::sync::Arc;

use crate::auth::ServiceIdentity;
use crate::protocol::{
    ErrorCode, LobbyError, Member, MemberLocation, Room, RoomStatus, ServerEvent, UserId,
};
use crate::returns::{InitiateOutcome, ReturnStatus};
use crate::store::LobbyStore;

use super::LobbyServer;

/// Who asked for a group return: the room's host over the lobby socket, or
/// an external game service over HTTP with a scoped API key.
#[derive(Debug, Clone)]
pub enum ReturnCaller {
    Host(UserId),
    Service(ServiceIdentity),
}

/// Member state as reported by an external game over HTTP.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    InGame,
    Returning,
    Lobby,
    Disconnected,
}

impl LobbyServer {
    /// End the external game for a room. With `return_players` the members
    /// are shepherded back (both push and poll paths); without it the room
    /// terminates as `Finished`.
    pub async fn end_game(
        &self,
        room_code: &str,
        caller: ReturnCaller,
        return_players: bool,
    ) -> Result<InitiateOutcome, LobbyError> {
        if return_players {
            return self.return_to_lobby(room_code, caller).await;
        }

        let _room_guard = self.locks.acquire(room_code).await;
        let room = self.authorized_room(room_code, &caller).await?;
        self.finish_room(&room).await?;
        Ok(InitiateOutcome {
            freshly_initiated: false,
            players_affected: 0,
            return_url: self.returns.lobby_return_url(room_code),
        })
    }

    /// Initiate (or idempotently repeat) a group return-to-lobby.
    pub async fn return_to_lobby(
        &self,
        room_code: &str,
        caller: ReturnCaller,
    ) -> Result<InitiateOutcome, LobbyError> {
        let span = tracing::info_span!("room.return", %room_code);
        let _span_guard = span.enter();

        let room_guard = self.locks.acquire(room_code).await;
        let room = self.authorized_room(room_code, &caller).await?;

        if room.status != RoomStatus::InGame && room.status != RoomStatus::Returning {
            return Err(LobbyError::rejected(
                ErrorCode::Validation,
                "The room has no game in progress to return from",
            ));
        }

        let members = self.store().list_members(&room.id).await?;
        let connected: Vec<Member> = members.into_iter().filter(|m| m.is_connected).collect();
        let outcome = self.returns.initiate(&room, connected.len()).await?;

        if !outcome.freshly_initiated {
            // Repeat call while pending: same URL, no duplicate fan-out.
            return Ok(outcome);
        }

        self.metrics().increment_returns_initiated();
        self.log_event(
            room.id,
            caller_user(&caller),
            "return_initiated",
            serde_json::json!({ "players_affected": outcome.players_affected }),
        )
        .await;

        // Push fan-out off the critical section: members with a live lobby
        // socket get the signal immediately, the rest fall through to the
        // polling path.
        drop(room_guard);
        for member in &connected {
            if !self.registry.is_user_attached(&member.user_id, room_code) {
                continue;
            }
            if !self.returns.mark_delivered(room.id, member.user_id) {
                continue;
            }
            let delivery = self.returns.delivery_for(&room, member).await?;
            self.send_to_user(
                room_code,
                &member.user_id,
                Arc::new(ServerEvent::ReturnToLobby {
                    return_url: delivery.return_url,
                    room_code: delivery.room_code,
                    session_token: delivery.session_token,
                }),
            );
        }

        tracing::info!(room_id = %room.id, players = outcome.players_affected, "Group return initiated");
        Ok(outcome)
    }

    /// Pull path: `GET /api/v2/rooms/{code}/return-status?playerId=`.
    /// Signals at most once per member per cycle; every poll is recorded in
    /// the event log.
    pub async fn poll_return_status(
        &self,
        room_code: &str,
        player_id: UserId,
    ) -> Result<ReturnStatus, LobbyError> {
        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;
        let member = self
            .store()
            .get_member(&room.id, &player_id)
            .await?
            .ok_or_else(|| LobbyError::unauthorized("Player is not a member of this room"))?;

        let status = self.returns.poll_status(&room, &member).await?;
        self.metrics().increment_return_polls_served();
        self.log_event(
            room.id,
            Some(player_id),
            "return_poll",
            serde_json::json!({ "delivered": status.should_return }),
        )
        .await;
        Ok(status)
    }

    /// `POST /api/v2/rooms/{code}/players/{id}/status`: external games
    /// report member movement. A `game -> lobby` transition arms the return
    /// grace window before the location flips.
    pub async fn report_player_status(
        &self,
        room_code: &str,
        player_id: UserId,
        reported: ReportedStatus,
        identity: &ServiceIdentity,
    ) -> Result<(), LobbyError> {
        let _room_guard = self.locks.acquire(room_code).await;

        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;
        self.api_keys
            .authorize_room(identity, room.current_game.as_deref())
            .map_err(|err| LobbyError::unauthorized(err.to_string()))?;

        let member = self
            .store()
            .get_member(&room.id, &player_id)
            .await?
            .ok_or_else(|| LobbyError::unauthorized("Player is not a member of this room"))?;

        // Game-side reports double as liveness for members whose lobby
        // socket closed during the handoff.
        self.store()
            .record_member_ping(&room.id, &player_id, chrono::Utc::now())
            .await?;

        match reported {
            ReportedStatus::InGame => {
                self.store()
                    .set_member_location(&room.id, &player_id, MemberLocation::Game)
                    .await?;
            }
            ReportedStatus::Returning => {
                // Heading back: protect the upcoming navigation from being
                // read as a departure.
                self.returns.arm_return_grace(&room.id).await?;
            }
            ReportedStatus::Lobby => {
                if member.current_location == MemberLocation::Game {
                    self.returns.arm_return_grace(&room.id).await?;
                }
                self.store()
                    .set_member_location(&room.id, &player_id, MemberLocation::Lobby)
                    .await?;
                let room = self
                    .store()
                    .get_room_by_code(room_code)
                    .await?
                    .ok_or_else(|| LobbyError::room_not_found(room_code))?;
                let members = self.store().list_members(&room.id).await?;
                self.maybe_complete_return(&room, &members).await?;
            }
            ReportedStatus::Disconnected => {
                self.member_disconnect_locked(&room, player_id).await?;
            }
        }

        self.store().touch_room(&room.id).await?;
        Ok(())
    }

    /// Clear the pending return when every connected member is back in the
    /// lobby (or the cycle timed out). Caller holds the room lock.
    pub(crate) async fn maybe_complete_return(
        &self,
        room: &Room,
        members: &[Member],
    ) -> Result<bool, LobbyError> {
        if !self.returns.should_clear(room, members, chrono::Utc::now()) {
            return Ok(false);
        }
        self.returns.clear(&room.id).await?;
        self.log_event(room.id, None, "return_completed", serde_json::json!({}))
            .await;
        tracing::info!(room_id = %room.id, "Group return completed");
        Ok(true)
    }

    /// Fetch the room and check the caller's authority over it.
    async fn authorized_room(
        &self,
        room_code: &str,
        caller: &ReturnCaller,
    ) -> Result<Room, LobbyError> {
        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;

        match caller {
            ReturnCaller::Host(user_id) => {
                if room.host_id != *user_id {
                    return Err(LobbyError::unauthorized(
                        "Only the host can end the game for the room",
                    ));
                }
            }
            ReturnCaller::Service(identity) => {
                self.api_keys
                    .authorize_room(identity, room.current_game.as_deref())
                    .map_err(|err| LobbyError::unauthorized(err.to_string()))?;
            }
        }
        Ok(room)
    }
}

fn caller_user(caller: &ReturnCaller) -> Option<UserId> {
    match caller {
        ReturnCaller::Host(user_id) => Some(*user_id),
        ReturnCaller::Service(_) => None,
    }
}
