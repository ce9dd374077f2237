// Protocol module: wire message types, validation, and room state

pub mod error_codes;
pub mod messages;
pub mod room_codes;
pub mod room_state;
pub mod types;
pub mod validation;

pub use error_codes::{ErrorCode, LobbyError};

pub use types::{
    ConnId, MemberInfo, MemberLocation, MemberRole, PremiumTier, RoomId, RoomSnapshot, RoomStatus,
    UserId, UserProfile, MAX_CHAT_MESSAGE_LENGTH, MAX_DISPLAY_NAME_LENGTH, MAX_PLAYERS_CEILING,
    MIN_PLAYERS_FLOOR, ROOM_CODE_LENGTH,
};

pub use messages::{
    ClientMessage, HostTransferReason, OutboundFrame, RoomStatePayload, ServerEvent,
};

pub use room_state::{snapshot, Member, Room, RoomEvent, RoomMetadata, RoomOptions};
