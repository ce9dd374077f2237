use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error codes for structured error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request options or payload fields are out of range or malformed.
    Validation,
    /// No room exists for the supplied room code.
    RoomNotFound,
    /// The room's connected member count already equals `max_players`.
    RoomFull,
    /// The room exists but is finished or abandoned.
    RoomNotAvailable,
    /// Another connected member already uses this display name.
    DuplicateName,
    /// A rejoin was attempted on a membership older than the session cap.
    SessionExpired,
    /// Caller is not the host, or not a member of the room at all.
    Unauthorized,
    /// Rate limit hit, or the operation's target is missing.
    Forbidden,
    /// Duplicate connection attach or conflicting concurrent operation.
    Conflict,
    /// Session token does not exist or has expired.
    NotFound,
    /// Store or infrastructure failure after retry.
    Internal,
}

impl ErrorCode {
    /// Human-readable description surfaced in `ERROR` frames and HTTP bodies.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => {
                "The provided input is invalid or out of range. Check your request parameters."
            }
            Self::RoomNotFound => {
                "The requested room could not be found. It may have been closed or the code is incorrect."
            }
            Self::RoomFull => {
                "The room has reached its maximum player capacity. Try joining a different room."
            }
            Self::RoomNotAvailable => {
                "The room is no longer accepting players. It has finished or been abandoned."
            }
            Self::DuplicateName => {
                "Another connected player already uses this name. Pick a different one."
            }
            Self::SessionExpired => {
                "Your previous session in this room is too old to resume. Join again as a new player."
            }
            Self::Unauthorized => {
                "You are not allowed to perform this action. Only the host can do that, or you are not in this room."
            }
            Self::Forbidden => {
                "The request was refused. You may be sending too quickly, or the target no longer exists."
            }
            Self::Conflict => {
                "The operation conflicts with the current connection state. Retry after reconnecting."
            }
            Self::NotFound => {
                "The session token does not exist or has expired. Request a fresh handoff from the lobby."
            }
            Self::Internal => {
                "An internal server error occurred. Please try again or contact support if the issue persists."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Domain error carried by every fallible lobby operation.
///
/// `Rejected` maps one-to-one onto an `ERROR { code, message }` frame to the
/// originating connection; `Internal` wraps store/infrastructure failures
/// that survived the single retry.
#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("{reason}")]
    Rejected { code: ErrorCode, reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LobbyError {
    pub fn rejected(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::rejected(ErrorCode::Validation, reason)
    }

    pub fn room_not_found(room_code: &str) -> Self {
        Self::rejected(ErrorCode::RoomNotFound, format!("Room {room_code} not found"))
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::rejected(ErrorCode::Unauthorized, reason)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Rejected { code, .. } => *code,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Message safe to surface to the originating connection.
    pub fn client_message(&self) -> String {
        match self {
            Self::Rejected { reason, .. } => reason.clone(),
            Self::Internal(_) => ErrorCode::Internal.description().to_string(),
        }
    }
}
