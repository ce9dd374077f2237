use super::room_codes;
use super::room_state::Member;
use super::types::{
    MAX_CHAT_MESSAGE_LENGTH, MAX_DISPLAY_NAME_LENGTH, MAX_PLAYERS_CEILING, MIN_PLAYERS_FLOOR,
};

/// Validate a display name: non-empty after trimming, no surrounding
/// whitespace, no control characters, at most 50 characters.
pub fn validate_display_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Player name cannot be empty".to_string());
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(format!(
            "Player name cannot exceed {MAX_DISPLAY_NAME_LENGTH} characters"
        ));
    }
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Player name cannot be only whitespace".to_string());
    }
    if trimmed.len() != name.len() {
        return Err("Player name cannot have leading or trailing whitespace".to_string());
    }
    if name.chars().any(char::is_control) {
        return Err("Player name cannot contain control characters".to_string());
    }
    Ok(())
}

/// Validate a room code against the generator's alphabet and length.
pub fn validate_room_code(code: &str) -> Result<(), String> {
    if room_codes::is_valid_room_code(code) {
        Ok(())
    } else {
        Err("Room code must be 6 characters from the room code alphabet".to_string())
    }
}

/// Validate the requested room size against the configured bounds.
pub fn validate_max_players(max_players: u8) -> Result<(), String> {
    if !(MIN_PLAYERS_FLOOR..=MAX_PLAYERS_CEILING).contains(&max_players) {
        return Err(format!(
            "max_players must be between {MIN_PLAYERS_FLOOR} and {MAX_PLAYERS_CEILING}"
        ));
    }
    Ok(())
}

/// Validate an external game identifier: non-empty, at most 64 characters,
/// alphanumeric plus `-` and `_`.
pub fn validate_game_type(game_type: &str) -> Result<(), String> {
    if game_type.is_empty() {
        return Err("Game identifier cannot be empty".to_string());
    }
    if game_type.len() > 64 {
        return Err("Game identifier cannot exceed 64 characters".to_string());
    }
    if !game_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("Game identifier may only contain letters, digits, '-' and '_'".to_string());
    }
    Ok(())
}

/// Validate a chat body before relaying it.
pub fn validate_chat_message(message: &str) -> Result<(), String> {
    if message.trim().is_empty() {
        return Err("Chat message cannot be empty".to_string());
    }
    if message.chars().count() > MAX_CHAT_MESSAGE_LENGTH {
        return Err(format!(
            "Chat message cannot exceed {MAX_CHAT_MESSAGE_LENGTH} characters"
        ));
    }
    Ok(())
}

/// No two currently-connected members of a room may share a display name
/// (case-insensitive). Disconnected rows do not reserve their name.
pub fn validate_name_unique_among_connected(name: &str, members: &[Member]) -> Result<(), String> {
    let lowered = name.to_lowercase();
    let taken = members
        .iter()
        .any(|m| m.is_connected && m.display_name.to_lowercase() == lowered);
    if taken {
        Err(format!("Name '{name}' is already taken in this room"))
    } else {
        Ok(())
    }
}
