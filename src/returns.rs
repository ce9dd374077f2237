//! Return-to-lobby coordination.
//!
//! Both signalling paths (socket push and HTTP poll) are driven off the same
//! `pending_return` flag in the room's metadata. The coordinator owns the
//! per-cycle bookkeeping: which members already received the signal (each
//! member is signalled at most once per cycle, whichever path reaches them
//! first) and the construction of return URLs, which substitute a session
//! token for the room code when the room runs in streamer mode.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use url::Url;

use crate::config::LobbyConfig;
use crate::protocol::{Member, MemberLocation, Room, RoomId, UserId};
use crate::session::{SessionMetadata, SessionService};
use crate::store::LobbyStore;

/// Result of arming the pending-return flag.
#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    /// False when a return was already pending (idempotent repeat).
    pub freshly_initiated: bool,
    /// Connected members at initiation time.
    pub players_affected: usize,
    /// Room-level return URL for the caller's response body.
    pub return_url: String,
}

/// Per-member payload for either delivery path.
#[derive(Debug, Clone)]
pub struct ReturnDelivery {
    pub return_url: String,
    pub room_code: Option<String>,
    pub session_token: Option<String>,
}

/// Body of a `return-status` poll response.
#[derive(Debug, Clone)]
pub struct ReturnStatus {
    pub should_return: bool,
    pub return_url: Option<String>,
    pub session_token: Option<String>,
}

pub struct ReturnCoordinator {
    store: Arc<dyn LobbyStore>,
    sessions: Arc<SessionService>,
    base_url: Url,
    grace: Duration,
    clear_after: Duration,
    /// Members already signalled in the current cycle, per room.
    delivered: DashMap<RoomId, HashSet<UserId>>,
}

impl ReturnCoordinator {
    pub fn new(
        store: Arc<dyn LobbyStore>,
        sessions: Arc<SessionService>,
        config: &LobbyConfig,
    ) -> Result<Self> {
        let base_url = Url::parse(&config.public_base_url)
            .map_err(|err| anyhow::anyhow!("invalid public_base_url: {err}"))?;
        Ok(Self {
            store,
            sessions,
            base_url,
            grace: Duration::seconds(config.return_grace_secs as i64),
            clear_after: Duration::seconds(config.return_clear_after_secs as i64),
            delivered: DashMap::new(),
        })
    }

    fn grace_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.grace
    }

    /// Lobby URL carrying the room code (normal mode).
    pub fn lobby_return_url(&self, room_code: &str) -> String {
        let mut url = self.base_url.clone();
        url.set_path(&format!("/lobby/{room_code}"));
        url.to_string()
    }

    /// Token-only URL for streamer mode; the client resolves the token to
    /// recover its room.
    pub fn streamer_return_url(&self, session_token: &str) -> String {
        let mut url = self.base_url.clone();
        url.set_path("/");
        url.set_query(Some(&format!("return={session_token}")));
        url.to_string()
    }

    /// Arm the pending-return flag. Idempotent: a repeat while a return is
    /// pending reports `freshly_initiated = false` and the same URL, and the
    /// caller must not fan out again.
    pub async fn initiate(&self, room: &Room, connected_members: usize) -> Result<InitiateOutcome> {
        let now = Utc::now();
        let freshly_initiated = self
            .store
            .set_pending_return(&room.id, now, self.grace_deadline(now))
            .await?;

        if freshly_initiated {
            self.delivered.remove(&room.id);
        }

        let return_url = if room.streamer_mode {
            // Never expose the room code; members each get a tokened URL on
            // their own delivery path.
            self.base_url.to_string()
        } else {
            self.lobby_return_url(&room.code)
        };

        Ok(InitiateOutcome {
            freshly_initiated,
            players_affected: connected_members,
            return_url,
        })
    }

    /// Arm (or extend) the return grace window without starting a cycle.
    /// Called when a member is observed navigating game -> lobby.
    pub async fn arm_return_grace(&self, room_id: &RoomId) -> Result<()> {
        let now = Utc::now();
        self.store
            .set_return_grace(room_id, self.grace_deadline(now))
            .await
    }

    /// First-delivery check: true exactly once per (cycle, member).
    pub fn mark_delivered(&self, room_id: RoomId, user_id: UserId) -> bool {
        self.delivered.entry(room_id).or_default().insert(user_id)
    }

    /// Build the per-member payload, minting a session token in streamer
    /// mode. Call only after `mark_delivered` returned true.
    pub async fn delivery_for(&self, room: &Room, member: &Member) -> Result<ReturnDelivery> {
        if room.streamer_mode {
            let game_type = room.current_game.as_deref().unwrap_or("lobby");
            let token = self
                .sessions
                .mint(
                    &room.code,
                    member.user_id,
                    game_type,
                    true,
                    SessionMetadata {
                        display_name: member.display_name.clone(),
                        is_host: room.host_id == member.user_id,
                        player_count: 0,
                        premium_tier: Default::default(),
                    },
                )
                .await?;
            Ok(ReturnDelivery {
                return_url: self.streamer_return_url(&token),
                room_code: None,
                session_token: Some(token),
            })
        } else {
            Ok(ReturnDelivery {
                return_url: self.lobby_return_url(&room.code),
                room_code: Some(room.code.clone()),
                session_token: None,
            })
        }
    }

    /// Poll-path handler body: signals at most once per member per cycle.
    pub async fn poll_status(&self, room: &Room, member: &Member) -> Result<ReturnStatus> {
        if !room.metadata.pending_return {
            return Ok(ReturnStatus {
                should_return: false,
                return_url: None,
                session_token: None,
            });
        }

        if !self.mark_delivered(room.id, member.user_id) {
            return Ok(ReturnStatus {
                should_return: false,
                return_url: None,
                session_token: None,
            });
        }

        let delivery = self.delivery_for(room, member).await?;
        Ok(ReturnStatus {
            should_return: true,
            return_url: Some(delivery.return_url),
            session_token: delivery.session_token,
        })
    }

    /// Whether the pending return has run its course: every connected member
    /// is back in the lobby, or the clear-after window elapsed.
    pub fn should_clear(&self, room: &Room, members: &[Member], now: DateTime<Utc>) -> bool {
        if !room.metadata.pending_return {
            return false;
        }
        let all_back = members
            .iter()
            .filter(|m| m.is_connected)
            .all(|m| m.current_location == MemberLocation::Lobby);
        let timed_out = room
            .metadata
            .return_initiated_at
            .is_some_and(|initiated| now - initiated >= self.clear_after);
        all_back || timed_out
    }

    /// Clear the flag and drop the cycle's delivery bookkeeping.
    pub async fn clear(&self, room_id: &RoomId) -> Result<bool> {
        self.delivered.remove(room_id);
        self.store.clear_pending_return(room_id).await
    }

    /// Drop per-room state when a room is deleted.
    pub fn forget_room(&self, room_id: &RoomId) {
        self.delivered.remove(room_id);
    }
}
