use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error_codes::ErrorCode;
use super::types::{MemberInfo, RoomSnapshot, UserId};

/// Message kinds sent from lobby clients to the server. Payloads are small
/// JSON objects: `{"type": "ROOM.JOIN", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Binds an authenticated identity to the connection. MUST be the first
    /// message on every connection.
    #[serde(rename = "USER.IDENTIFY", rename_all = "camelCase")]
    Identify { user_id: UserId },

    #[serde(rename = "ROOM.CREATE", rename_all = "camelCase")]
    CreateRoom {
        player_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        game_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_players: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_public: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        streamer_mode: Option<bool>,
    },

    #[serde(rename = "ROOM.JOIN", rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        player_name: String,
    },

    #[serde(rename = "ROOM.LEAVE", rename_all = "camelCase")]
    LeaveRoom { room_code: String },

    #[serde(rename = "PLAYER.TOGGLE_READY", rename_all = "camelCase")]
    ToggleReady { room_code: String },

    #[serde(rename = "PLAYER.TRANSFER_HOST", rename_all = "camelCase")]
    TransferHost {
        room_code: String,
        target_player_id: UserId,
    },

    #[serde(rename = "PLAYER.KICK", rename_all = "camelCase")]
    Kick {
        room_code: String,
        target_player_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "GAME.SELECT", rename_all = "camelCase")]
    SelectGame {
        game_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        settings: Option<serde_json::Value>,
    },

    #[serde(rename = "GAME.START", rename_all = "camelCase")]
    StartGame { room_code: String },

    #[serde(rename = "CHAT.MESSAGE", rename_all = "camelCase")]
    Chat {
        message: String,
        player_name: String,
    },

    #[serde(rename = "CONNECTION.HEARTBEAT")]
    Heartbeat {},
}

/// Why a host transfer happened, carried on `HOST.TRANSFERRED`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostTransferReason {
    Manual,
    HostDisconnected,
    HostLeft,
}

/// Payload for `ROOM.CREATED` / `ROOM.JOINED`. Boxed in the event enum to
/// keep the enum small.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatePayload {
    pub player_id: UserId,
    pub room: RoomSnapshot,
}

/// Event kinds broadcast from the server to lobby clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "ROOM.CREATED")]
    RoomCreated(Box<RoomStatePayload>),

    #[serde(rename = "ROOM.JOINED")]
    RoomJoined(Box<RoomStatePayload>),

    #[serde(rename = "PLAYER.JOINED", rename_all = "camelCase")]
    PlayerJoined { player: MemberInfo },

    #[serde(rename = "PLAYER.LEFT", rename_all = "camelCase")]
    PlayerLeft { player_id: UserId },

    #[serde(rename = "PLAYER.DISCONNECTED", rename_all = "camelCase")]
    PlayerDisconnected { player_id: UserId },

    #[serde(rename = "PLAYER.READY_CHANGED", rename_all = "camelCase")]
    PlayerReadyChanged { player_id: UserId, is_ready: bool },

    #[serde(rename = "PLAYER.KICKED", rename_all = "camelCase")]
    PlayerKicked {
        player_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "HOST.TRANSFERRED", rename_all = "camelCase")]
    HostTransferred {
        old_host_id: UserId,
        new_host_id: UserId,
        reason: HostTransferReason,
    },

    #[serde(rename = "GAME.SELECTED", rename_all = "camelCase")]
    GameSelected {
        game_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        settings: Option<serde_json::Value>,
        selected_by: UserId,
    },

    /// Sent per-recipient: each member's `game_url` embeds their own session
    /// token. `room_code` is omitted when the room runs in streamer mode.
    #[serde(rename = "GAME.STARTED", rename_all = "camelCase")]
    GameStarted {
        game_url: String,
        game_type: String,
        is_host: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_code: Option<String>,
    },

    #[serde(rename = "CHAT.MESSAGE", rename_all = "camelCase")]
    Chat {
        player_id: UserId,
        player_name: String,
        message: String,
        sent_at: DateTime<Utc>,
    },

    /// Push-path group-return signal. `room_code` is omitted and
    /// `session_token` populated when the room runs in streamer mode.
    #[serde(rename = "server:return-to-gb", rename_all = "camelCase")]
    ReturnToLobby {
        return_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },

    #[serde(rename = "ERROR", rename_all = "camelCase")]
    Error {
        message: String,
        code: ErrorCode,
        /// Populated only outside production responses.
        #[serde(skip_serializing_if = "Option::is_none")]
        debug: Option<String>,
    },
}

/// Outbound wire frame: every server->client frame carries an ascending
/// per-connection `seq` for ordering diagnostics.
#[derive(Debug, Serialize)]
pub struct OutboundFrame<'a> {
    pub seq: u64,
    #[serde(flatten)]
    pub event: &'a ServerEvent,
}
