use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{
    MemberInfo, MemberLocation, MemberRole, RoomId, RoomSnapshot, RoomStatus, UserId,
};

// ============================================================================
// ROOM LIFECYCLE
// ============================================================================
//
// ```text
// [*] --> Lobby: ROOM.CREATE
//
// Lobby --> Lobby:     join / leave / ready / select_game / transfer_host
// Lobby --> InGame:    GAME.START (host, game selected, >= min connected)
// InGame --> Returning: return_to_lobby (host or scoped game service)
// Returning --> Lobby: last member re-attaches OR return grace expires
// InGame --> Finished: game reports end without returning players
// any --> Abandoned:   room reaper (idle / aged out), or last member leaves
// ```
//
// A room is never reaped while at least one connected member is located in
// the external game. The abandonment status is always `Abandoned` when no
// connected members remain; `Returning` is only ever the transient phase
// between a group return being initiated and the roster re-attaching.
// ============================================================================

/// Coordination flags stored alongside a room. The original product kept
/// these in a free-form metadata map; the core only ever reads these keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMetadata {
    /// A group return is in flight; cleared on completion, timeout, or a
    /// fresh game start.
    #[serde(default)]
    pub pending_return: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_initiated_at: Option<DateTime<Utc>>,
    /// Disconnects observed before this instant are treated as game->lobby
    /// navigation, not departure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_in_progress_until: Option<DateTime<Utc>>,
    /// Deadline for the disconnected host to re-attach before auto-transfer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_transfer_pending_until: Option<DateTime<Utc>>,
}

impl RoomMetadata {
    /// Whether a disconnect observed at `now` falls inside the return grace
    /// window and must be ignored by the disconnection pipeline.
    pub fn return_grace_active(&self, now: DateTime<Utc>) -> bool {
        self.return_in_progress_until
            .is_some_and(|until| now < until)
    }
}

/// Room row as persisted by the store. Members live in their own table,
/// keyed by `(room_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub code: String,
    pub host_id: UserId,
    pub status: RoomStatus,
    pub current_game: Option<String>,
    pub game_settings: Option<serde_json::Value>,
    pub max_players: u8,
    pub is_public: bool,
    pub streamer_mode: bool,
    pub metadata: RoomMetadata,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub game_started_at: Option<DateTime<Utc>>,
}

/// Options supplied by the creating client; validated before use.
#[derive(Debug, Clone, Default)]
pub struct RoomOptions {
    pub game_type: Option<String>,
    pub max_players: Option<u8>,
    pub is_public: Option<bool>,
    pub streamer_mode: Option<bool>,
}

impl Room {
    pub fn new(code: String, host_id: UserId, max_players: u8, options: &RoomOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code,
            host_id,
            status: RoomStatus::Lobby,
            current_game: options.game_type.clone(),
            game_settings: None,
            max_players,
            is_public: options.is_public.unwrap_or(true),
            streamer_mode: options.streamer_mode.unwrap_or(false),
            metadata: RoomMetadata::default(),
            created_at: now,
            last_activity: now,
            game_started_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Member row: one user's presence inside one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: MemberRole,
    pub is_connected: bool,
    pub current_location: MemberLocation,
    pub is_ready: bool,
    pub joined_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
}

impl Member {
    pub fn new(room_id: RoomId, user_id: UserId, display_name: String, role: MemberRole) -> Self {
        let now = Utc::now();
        Self {
            room_id,
            user_id,
            display_name,
            role,
            is_connected: true,
            current_location: MemberLocation::Lobby,
            is_ready: false,
            joined_at: now,
            last_ping: now,
        }
    }

    /// Move the member to a location, keeping the connectivity invariant:
    /// `is_connected` is true exactly when located in the lobby or the game.
    pub fn set_location(&mut self, location: MemberLocation) {
        self.current_location = location;
        self.is_connected = location.implies_connected();
    }

    pub fn mark_disconnected(&mut self) {
        self.set_location(MemberLocation::Disconnected);
    }

    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            role: self.role,
            is_connected: self.is_connected,
            current_location: self.current_location,
            is_ready: self.is_ready,
            joined_at: self.joined_at,
        }
    }
}

/// Assemble the wire snapshot for a room and its roster.
pub fn snapshot(room: &Room, members: &[Member]) -> RoomSnapshot {
    let mut players: Vec<MemberInfo> = members.iter().map(Member::info).collect();
    players.sort_by_key(|p| p.joined_at);
    RoomSnapshot {
        room_id: room.id,
        room_code: room.code.clone(),
        host_id: room.host_id,
        status: room.status,
        current_game: room.current_game.clone(),
        max_players: room.max_players,
        is_public: room.is_public,
        streamer_mode: room.streamer_mode,
        players,
        created_at: room.created_at,
    }
}

/// Append-only audit record owned by a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEvent {
    pub room_id: RoomId,
    pub user_id: Option<UserId>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RoomEvent {
    pub fn new(
        room_id: RoomId,
        user_id: Option<UserId>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            room_id,
            user_id,
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
