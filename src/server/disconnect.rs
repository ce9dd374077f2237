use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    ConnId, HostTransferReason, LobbyError, MemberLocation, Room, ServerEvent, UserId,
};
use crate::store::LobbyStore;

use super::LobbyServer;

impl LobbyServer {
    /// Socket-close entry point. Detaches the binding and, when that was the
    /// user's last connection in the room, runs the member-disconnect
    /// pipeline. Explicit leaves and silent drops both funnel through
    /// `member_disconnect_locked`.
    pub async fn on_conn_closed(&self, conn_id: ConnId) {
        let Some((user_id, room_code)) = self.registry.detach(&conn_id) else {
            return;
        };

        // Another tab keeps the member alive.
        if self.registry.is_user_attached(&user_id, &room_code) {
            return;
        }

        let _room_guard = self.locks.acquire(&room_code).await;
        let room = match self.store().get_room_by_code(&room_code).await {
            Ok(Some(room)) => room,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(%room_code, error = %err, "Failed to load room during disconnect");
                return;
            }
        };

        if let Err(err) = self.member_disconnect_locked(&room, user_id).await {
            tracing::warn!(
                %user_id,
                %room_code,
                error = %err,
                "Member disconnect handling failed"
            );
        }
    }

    /// The single member-disconnect pipeline. Caller holds the room lock.
    ///
    /// Within the return grace window the disconnect is ignored entirely:
    /// no roster flip, no broadcast, no host election. The member either
    /// re-attaches on the lobby side or the stale reaper eventually flips
    /// them.
    pub(crate) async fn member_disconnect_locked(
        &self,
        room: &Room,
        user_id: UserId,
    ) -> Result<(), LobbyError> {
        let now = Utc::now();
        if room.metadata.return_grace_active(now) {
            tracing::debug!(
                room_id = %room.id,
                %user_id,
                "Disconnect ignored inside return grace window"
            );
            return Ok(());
        }

        let member = match self.store().get_member(&room.id, &user_id).await? {
            Some(member) if member.is_connected => member,
            _ => return Ok(()),
        };

        // A member located in the external game has no lobby socket by
        // design; their liveness comes from the game's status reports and
        // the stale reaper, not from this pipeline.
        if member.current_location == MemberLocation::Game {
            tracing::debug!(
                room_id = %room.id,
                %user_id,
                "Socket closed for in-game member, not a departure"
            );
            return Ok(());
        }

        self.store()
            .set_member_location(&room.id, &user_id, MemberLocation::Disconnected)
            .await?;
        self.log_event(
            room.id,
            Some(user_id),
            "member_disconnected",
            serde_json::json!({}),
        )
        .await;
        self.broadcast_to_room_except(
            &room.code,
            &user_id,
            ServerEvent::PlayerDisconnected { player_id: user_id },
        );

        let members = self.store().list_members(&room.id).await?;
        let any_connected = members.iter().any(|m| m.is_connected);

        if !any_connected {
            // No grace for an empty room; the reaper handles the corpse.
            if room.status == crate::protocol::RoomStatus::Lobby {
                self.abandon_room_locked(room, "all_members_disconnected")
                    .await?;
            }
            return Ok(());
        }

        if member.user_id == room.host_id {
            self.schedule_host_grace(room).await?;
        }

        Ok(())
    }

    /// Start the host-grace countdown for a room whose host just dropped.
    /// The timer is cancelled by host re-attach or an explicit transfer.
    pub(crate) async fn schedule_host_grace(&self, room: &Room) -> Result<(), LobbyError> {
        let grace_secs = self.config().lobby.host_grace_secs;
        let deadline = Utc::now() + Duration::seconds(grace_secs as i64);
        self.store()
            .set_host_transfer_deadline(&room.id, Some(deadline))
            .await?;

        let token = self.host_grace_timer_entry(room.id);
        let room_id = room.id;
        let room_code = room.code.clone();
        let Some(server) = self.self_arc() else {
            return Ok(());
        };
        // The map entry is left in place after the timer resolves: a newer
        // schedule replaces it, and the room's teardown drops it. Removing
        // it here could race a reschedule and orphan the fresh timer.
        tokio::spawn(async move {
            if host_grace_wait(&token, grace_secs).await {
                server.resolve_host_grace(room_id, &room_code).await;
            }
        });

        tracing::info!(room_id = %room.id, grace_secs, "Host grace period started");
        Ok(())
    }

    /// Grace expired: promote the earliest-joined connected member, if the
    /// host is still gone.
    pub(crate) async fn resolve_host_grace(&self, room_id: crate::protocol::RoomId, room_code: &str) {
        let _room_guard = self.locks.acquire(room_code).await;

        let promoted = match self.store().promote_earliest_connected(&room_id).await {
            Ok(promoted) => promoted,
            Err(err) => {
                tracing::error!(%room_id, error = %err, "Host auto-transfer failed");
                return;
            }
        };

        let Some((old_host, new_host)) = promoted else {
            // Host reconnected, or nobody is left to promote.
            return;
        };

        self.metrics().increment_host_transfers();
        self.log_event(
            room_id,
            Some(new_host),
            "host_transferred",
            serde_json::json!({ "old_host": old_host, "reason": "host_disconnected" }),
        )
        .await;
        self.broadcast_to_room(
            room_code,
            ServerEvent::HostTransferred {
                old_host_id: old_host,
                new_host_id: new_host,
                reason: HostTransferReason::HostDisconnected,
            },
        );
        tracing::info!(%room_id, %old_host, %new_host, "Host auto-transferred after grace period");
    }
}

/// Wait out the grace period; returns false when cancelled first.
async fn host_grace_wait(token: &CancellationToken, grace_secs: u64) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(std::time::Duration::from_secs(grace_secs)) => true,
    }
}
