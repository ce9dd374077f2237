use thiserror::Error;

/// Failures produced by game-service API key validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing X-API-Key header")]
    MissingApiKey,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("API key for service '{service}' is not scoped to this room")]
    RoomOutOfScope { service: String },
}
