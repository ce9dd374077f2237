use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::protocol::{
    room_codes, snapshot, validation, ConnId, ErrorCode, HostTransferReason, LobbyError, Member,
    MemberRole, Room, RoomOptions, RoomStatePayload, RoomStatus, ServerEvent, UserId, UserProfile,
};
use crate::store::{LobbyStore, MemberUpsertOutcome};

use super::{retry_once, LobbyServer};

/// Attempts at generating a non-colliding room code before giving up.
const ROOM_CODE_ATTEMPTS: u8 = 16;

impl LobbyServer {
    /// `ROOM.CREATE`: mint a room, insert the creator as connected host, and
    /// attach the originating connection.
    pub async fn create_room(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        player_name: String,
        options: RoomOptions,
    ) -> Result<(), LobbyError> {
        let span = tracing::info_span!(
            "room.create",
            %conn_id,
            %user_id,
            room_code = tracing::field::Empty,
        );
        let _guard = span.enter();

        validation::validate_display_name(&player_name).map_err(LobbyError::validation)?;
        if let Some(game_type) = options.game_type.as_deref() {
            validation::validate_game_type(game_type).map_err(LobbyError::validation)?;
        }
        let max_players = options
            .max_players
            .unwrap_or(self.config().lobby.default_max_players);
        validation::validate_max_players(max_players).map_err(LobbyError::validation)?;

        if self.registry.get(&conn_id).is_some() {
            return Err(LobbyError::rejected(
                ErrorCode::Conflict,
                "Connection is already attached to a room",
            ));
        }

        self.store()
            .upsert_user(UserProfile {
                id: user_id,
                display_name: player_name.clone(),
                avatar_ref: None,
                premium_tier: Default::default(),
                last_seen: Utc::now(),
            })
            .await?;

        // Collision retry: regenerate on a taken code, surface anything else.
        let mut room: Option<Room> = None;
        for _ in 0..ROOM_CODE_ATTEMPTS {
            let code = room_codes::generate_room_code();
            let candidate = Room::new(code, user_id, max_players, &options);
            match self.store().insert_room(candidate).await {
                Ok(inserted) => {
                    room = Some(inserted);
                    break;
                }
                Err(err) if err.to_string().contains("already exists") => continue,
                Err(err) => return Err(LobbyError::Internal(err)),
            }
        }
        let room = room.ok_or_else(|| {
            LobbyError::Internal(anyhow::anyhow!(
                "failed to allocate a unique room code after {ROOM_CODE_ATTEMPTS} attempts"
            ))
        })?;
        span.record("room_code", tracing::field::display(&room.code));

        let host = Member::new(room.id, user_id, player_name, MemberRole::Host);
        retry_once("insert_host_member", || {
            self.store().upsert_member(host.clone())
        })
        .await?;

        // Cannot fail: the conn_id was checked unbound above and this task is
        // the only writer for it.
        if let Err(err) = self.registry.attach(conn_id, user_id, &room.code) {
            return Err(LobbyError::rejected(ErrorCode::Conflict, err.to_string()));
        }

        self.metrics().increment_rooms_created();
        self.metrics().increment_members_joined();
        self.log_event(
            room.id,
            Some(user_id),
            "room_created",
            serde_json::json!({ "room_code": room.code, "max_players": room.max_players }),
        )
        .await;

        let members = self.store().list_members(&room.id).await?;
        self.send_to_conn(
            &conn_id,
            Arc::new(ServerEvent::RoomCreated(Box::new(RoomStatePayload {
                player_id: user_id,
                room: snapshot(&room, &members),
            }))),
        );

        tracing::info!(room_id = %room.id, room_code = %room.code, "Room created");
        Ok(())
    }

    /// `ROOM.JOIN`: join (or re-join) a room by code.
    pub async fn join_room(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        room_code: String,
        player_name: String,
    ) -> Result<(), LobbyError> {
        let room_code = room_code.trim().to_ascii_uppercase();
        let span = tracing::info_span!("room.join", %conn_id, %user_id, %room_code);
        let _span_guard = span.enter();

        validation::validate_display_name(&player_name).map_err(LobbyError::validation)?;
        validation::validate_room_code(&room_code).map_err(LobbyError::validation)?;

        if self.registry.get(&conn_id).is_some() {
            return Err(LobbyError::rejected(
                ErrorCode::Conflict,
                "Connection is already attached to a room",
            ));
        }

        // Existence pre-check outside the lock keeps unknown codes cheap.
        if self.store().get_room_by_code(&room_code).await?.is_none() {
            return Err(LobbyError::room_not_found(&room_code));
        }

        let _room_guard = self.locks.acquire(&room_code).await;

        let room = self
            .store()
            .get_room_by_code(&room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(&room_code))?;

        if !room.status.accepts_joins() {
            return Err(LobbyError::rejected(
                ErrorCode::RoomNotAvailable,
                format!("Room {room_code} is no longer available"),
            ));
        }

        let members = self.store().list_members(&room.id).await?;
        let existing = members.iter().find(|m| m.user_id == user_id);

        if let Some(row) = existing {
            let session_age = Utc::now() - row.joined_at;
            let max_age = Duration::seconds(self.config().lobby.max_session_age_secs as i64);
            if session_age > max_age {
                return Err(LobbyError::rejected(
                    ErrorCode::SessionExpired,
                    "Previous session in this room is too old to resume",
                ));
            }
        } else {
            let connected = members.iter().filter(|m| m.is_connected).count();
            if connected >= room.max_players as usize {
                return Err(LobbyError::rejected(
                    ErrorCode::RoomFull,
                    format!("Room {room_code} is full"),
                ));
            }
        }

        // Name uniqueness among *other* currently-connected members.
        let others: Vec<Member> = members
            .iter()
            .filter(|m| m.user_id != user_id)
            .cloned()
            .collect();
        validation::validate_name_unique_among_connected(&player_name, &others)
            .map_err(|reason| LobbyError::rejected(ErrorCode::DuplicateName, reason))?;

        self.store()
            .upsert_user(UserProfile {
                id: user_id,
                display_name: player_name.clone(),
                avatar_ref: None,
                premium_tier: Default::default(),
                last_seen: Utc::now(),
            })
            .await?;

        let candidate = Member::new(room.id, user_id, player_name, MemberRole::Player);
        let outcome = retry_once("upsert_member", || {
            self.store().upsert_member(candidate.clone())
        })
        .await?;

        if let Err(err) = self.registry.attach(conn_id, user_id, &room_code) {
            return Err(LobbyError::rejected(ErrorCode::Conflict, err.to_string()));
        }

        // A re-attaching host voids its grace period.
        if room.host_id == user_id {
            self.cancel_host_grace_timer(&room.id);
            self.store()
                .set_host_transfer_deadline(&room.id, None)
                .await?;
        }

        // A member arriving during a pending return has completed their
        // return; never signal them again this cycle.
        if room.metadata.pending_return {
            self.returns.mark_delivered(room.id, user_id);
        }

        self.store().touch_room(&room.id).await?;
        self.metrics().increment_members_joined();
        self.log_event(
            room.id,
            Some(user_id),
            "member_joined",
            serde_json::json!({ "rejoined": outcome == MemberUpsertOutcome::Rejoined }),
        )
        .await;

        let members = self.store().list_members(&room.id).await?;
        let joined = members
            .iter()
            .find(|m| m.user_id == user_id)
            .cloned()
            .ok_or_else(|| LobbyError::Internal(anyhow::anyhow!("joined member row vanished")))?;
        let room = self
            .store()
            .get_room_by_code(&room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(&room_code))?;

        self.send_to_conn(
            &conn_id,
            Arc::new(ServerEvent::RoomJoined(Box::new(RoomStatePayload {
                player_id: user_id,
                room: snapshot(&room, &members),
            }))),
        );
        self.broadcast_to_room_except(
            &room_code,
            &user_id,
            ServerEvent::PlayerJoined {
                player: joined.info(),
            },
        );

        // The last expected member re-attaching completes a group return.
        self.maybe_complete_return(&room, &members).await?;

        tracing::info!(room_id = %room.id, rejoined = ?outcome, "Member joined room");
        Ok(())
    }

    /// `ROOM.LEAVE`: explicit departure deletes the member row.
    pub async fn leave_room(&self, user_id: UserId, room_code: &str) -> Result<(), LobbyError> {
        let span = tracing::info_span!("room.leave", %user_id, %room_code);
        let _span_guard = span.enter();

        let _room_guard = self.locks.acquire(room_code).await;

        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;

        let removed = self
            .store()
            .remove_member(&room.id, &user_id)
            .await?
            .ok_or_else(|| LobbyError::unauthorized("You are not a member of this room"))?;

        // Detach every connection the leaver holds so broadcasts skip them.
        for conn_id in self.registry.lookup(&user_id, room_code) {
            self.registry.detach(&conn_id);
        }

        self.metrics().increment_members_left();
        self.log_event(room.id, Some(user_id), "member_left", serde_json::json!({}))
            .await;

        let members = self.store().list_members(&room.id).await?;
        let any_connected = members.iter().any(|m| m.is_connected);

        if !any_connected {
            self.abandon_room_locked(&room, "last_member_left").await?;
            return Ok(());
        }

        self.broadcast_to_room(room_code, ServerEvent::PlayerLeft { player_id: user_id });

        if removed.role == MemberRole::Host {
            // Immediate re-election: the host is gone for good.
            self.cancel_host_grace_timer(&room.id);
            if let Some((old_host, new_host)) = self
                .store()
                .promote_earliest_connected(&room.id)
                .await?
            {
                self.metrics().increment_host_transfers();
                self.log_event(
                    room.id,
                    Some(new_host),
                    "host_transferred",
                    serde_json::json!({ "old_host": old_host, "reason": "host_left" }),
                )
                .await;
                self.broadcast_to_room(
                    room_code,
                    ServerEvent::HostTransferred {
                        old_host_id: old_host,
                        new_host_id: new_host,
                        reason: HostTransferReason::HostLeft,
                    },
                );
            }
        }

        self.store().touch_room(&room.id).await?;
        Ok(())
    }

    /// `PLAYER.TOGGLE_READY`.
    pub async fn toggle_ready(&self, user_id: UserId, room_code: &str) -> Result<(), LobbyError> {
        let _room_guard = self.locks.acquire(room_code).await;

        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;
        let member = self
            .store()
            .get_member(&room.id, &user_id)
            .await?
            .filter(|m| m.is_connected)
            .ok_or_else(|| LobbyError::unauthorized("You are not connected to this room"))?;

        let is_ready = !member.is_ready;
        self.store()
            .set_member_ready(&room.id, &user_id, is_ready)
            .await?;
        self.store().touch_room(&room.id).await?;

        self.broadcast_to_room(
            room_code,
            ServerEvent::PlayerReadyChanged {
                player_id: user_id,
                is_ready,
            },
        );
        Ok(())
    }

    /// `GAME.SELECT`: host-only game selection.
    pub async fn select_game(
        &self,
        user_id: UserId,
        room_code: &str,
        game_type: String,
        settings: Option<serde_json::Value>,
    ) -> Result<(), LobbyError> {
        validation::validate_game_type(&game_type).map_err(LobbyError::validation)?;

        let _room_guard = self.locks.acquire(room_code).await;

        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;
        if room.host_id != user_id {
            return Err(LobbyError::unauthorized("Only the host can select a game"));
        }
        if room.status != RoomStatus::Lobby {
            return Err(LobbyError::rejected(
                ErrorCode::Validation,
                "Games can only be selected while the room is in the lobby",
            ));
        }

        self.store()
            .set_current_game(&room.id, &game_type, settings.clone())
            .await?;

        self.broadcast_to_room(
            room_code,
            ServerEvent::GameSelected {
                game_type,
                settings,
                selected_by: user_id,
            },
        );
        Ok(())
    }

    /// `PLAYER.TRANSFER_HOST`: explicit host handover.
    pub async fn transfer_host(
        &self,
        user_id: UserId,
        room_code: &str,
        target: UserId,
    ) -> Result<(), LobbyError> {
        let _room_guard = self.locks.acquire(room_code).await;

        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;
        if room.host_id != user_id {
            return Err(LobbyError::unauthorized("Only the host can transfer the host role"));
        }
        if target == user_id {
            return Err(LobbyError::validation("Cannot transfer host to yourself"));
        }

        let swapped = self.store().transfer_host(&room.id, &user_id, &target).await?;
        if !swapped {
            return Err(LobbyError::rejected(
                ErrorCode::Forbidden,
                "Target is not a connected member of this room",
            ));
        }

        self.cancel_host_grace_timer(&room.id);
        self.metrics().increment_host_transfers();
        self.log_event(
            room.id,
            Some(target),
            "host_transferred",
            serde_json::json!({ "old_host": user_id, "reason": "manual" }),
        )
        .await;
        self.broadcast_to_room(
            room_code,
            ServerEvent::HostTransferred {
                old_host_id: user_id,
                new_host_id: target,
                reason: HostTransferReason::Manual,
            },
        );
        Ok(())
    }

    /// `PLAYER.KICK`: host-only member removal.
    pub async fn kick(
        &self,
        user_id: UserId,
        room_code: &str,
        target: UserId,
        reason: Option<String>,
    ) -> Result<(), LobbyError> {
        let _room_guard = self.locks.acquire(room_code).await;

        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;
        if room.host_id != user_id {
            return Err(LobbyError::unauthorized("Only the host can kick players"));
        }
        if target == user_id {
            return Err(LobbyError::validation("The host cannot kick themselves"));
        }

        let removed = self.store().remove_member(&room.id, &target).await?;
        if removed.is_none() {
            return Err(LobbyError::rejected(
                ErrorCode::Forbidden,
                "Kick target is not in this room",
            ));
        }

        // Deliver the kick to the target before their bindings go away.
        let kicked_event = Arc::new(ServerEvent::PlayerKicked {
            player_id: target,
            reason: reason.clone(),
        });
        self.send_to_user(room_code, &target, Arc::clone(&kicked_event));
        for conn_id in self.registry.lookup(&target, room_code) {
            self.registry.detach(&conn_id);
        }

        self.metrics().increment_members_kicked();
        self.log_event(
            room.id,
            Some(user_id),
            "member_kicked",
            serde_json::json!({ "target": target, "reason": reason }),
        )
        .await;
        self.broadcast_to_room(
            room_code,
            ServerEvent::PlayerKicked {
                player_id: target,
                reason,
            },
        );
        self.store().touch_room(&room.id).await?;
        Ok(())
    }

    /// `CHAT.MESSAGE`: relay to the roster; bodies are never persisted.
    pub async fn chat(
        &self,
        user_id: UserId,
        room_code: &str,
        message: String,
    ) -> Result<(), LobbyError> {
        validation::validate_chat_message(&message).map_err(LobbyError::validation)?;

        let room = self
            .store()
            .get_room_by_code(room_code)
            .await?
            .ok_or_else(|| LobbyError::room_not_found(room_code))?;
        let member = self
            .store()
            .get_member(&room.id, &user_id)
            .await?
            .filter(|m| m.is_connected)
            .ok_or_else(|| LobbyError::unauthorized("You are not connected to this room"))?;

        self.store().touch_room(&room.id).await?;
        self.broadcast_to_room(
            room_code,
            ServerEvent::Chat {
                player_id: user_id,
                // The stored name is authoritative, not the frame's copy.
                player_name: member.display_name,
                message,
                sent_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Flip a room to `Abandoned`. Caller holds the room lock.
    pub(crate) async fn abandon_room_locked(
        &self,
        room: &Room,
        reason: &str,
    ) -> Result<(), LobbyError> {
        retry_once("abandon_room", || {
            self.store().set_room_status(&room.id, RoomStatus::Abandoned)
        })
        .await?;
        self.cancel_host_grace_timer(&room.id);
        self.returns.forget_room(&room.id);
        self.metrics().increment_rooms_abandoned();
        self.log_event(
            room.id,
            None,
            "room_abandoned",
            serde_json::json!({ "reason": reason }),
        )
        .await;
        tracing::info!(room_id = %room.id, room_code = %room.code, reason, "Room abandoned");
        Ok(())
    }
}
