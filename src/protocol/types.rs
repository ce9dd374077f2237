use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque user identifier handed to the core by the identity collaborator.
pub type UserId = Uuid;

/// Stable room identifier. Clients address rooms by code; the store keys by id.
pub type RoomId = Uuid;

/// Identifier of a single transport connection. A user may hold several.
pub type ConnId = Uuid;

/// Room codes are always this many characters.
pub const ROOM_CODE_LENGTH: usize = 6;

/// Display names are capped at this many characters.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 50;

/// Chat bodies are relayed, never persisted, and capped at this many characters.
pub const MAX_CHAT_MESSAGE_LENGTH: usize = 500;

/// Hard floor and ceiling for a room's `max_players` option.
pub const MIN_PLAYERS_FLOOR: u8 = 2;
pub const MAX_PLAYERS_CEILING: u8 = 50;

/// Subscription tier snapshot carried on user profiles and session metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PremiumTier {
    #[default]
    Free,
    Monthly,
    Lifetime,
}

/// Room lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    Lobby,
    InGame,
    Returning,
    Finished,
    Abandoned,
}

impl RoomStatus {
    /// Whether new members may still join a room in this status.
    pub fn accepts_joins(self) -> bool {
        !matches!(self, Self::Abandoned | Self::Finished)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Abandoned | Self::Finished)
    }
}

/// Role of a member within a room. Exactly one host exists per live room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Host,
    #[default]
    Player,
    Spectator,
}

/// Where a member currently is from the lobby's point of view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberLocation {
    #[default]
    Lobby,
    Game,
    Disconnected,
}

impl MemberLocation {
    /// The member-state invariant: connected iff located in lobby or game.
    pub fn implies_connected(self) -> bool {
        matches!(self, Self::Lobby | Self::Game)
    }
}

/// User profile as persisted by the core. Created by the identity
/// collaborator, referenced but never destroyed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub premium_tier: PremiumTier,
    pub last_seen: DateTime<Utc>,
}

/// Wire-facing snapshot of a member, embedded in roster broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub user_id: UserId,
    pub display_name: String,
    pub role: MemberRole,
    pub is_connected: bool,
    pub current_location: MemberLocation,
    pub is_ready: bool,
    pub joined_at: DateTime<Utc>,
}

/// Wire-facing snapshot of a room and its roster, carried on
/// `ROOM.CREATED` / `ROOM.JOINED` so clients can render without a
/// follow-up query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub room_code: String,
    pub host_id: UserId,
    pub status: RoomStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_game: Option<String>,
    pub max_players: u8,
    pub is_public: bool,
    pub streamer_mode: bool,
    pub players: Vec<MemberInfo>,
    pub created_at: DateTime<Utc>,
}
