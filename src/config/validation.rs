//! Configuration validation.

use crate::protocol::{MAX_PLAYERS_CEILING, MIN_PLAYERS_FLOOR};

use super::types::Config;

/// Whether the process runs with production hardening enabled.
pub fn is_production_mode(config: &Config) -> bool {
    config.security.production
}

/// Validate security-relevant settings. Returns all problems joined by
/// newlines so operators see the complete list in one pass.
pub fn validate_config_security(config: &Config) -> Result<(), String> {
    let mut problems = Vec::new();

    if config.lobby.min_players < MIN_PLAYERS_FLOOR {
        problems.push(format!(
            "lobby.min_players must be at least {MIN_PLAYERS_FLOOR}"
        ));
    }
    if config.lobby.default_max_players < config.lobby.min_players
        || config.lobby.default_max_players > MAX_PLAYERS_CEILING
    {
        problems.push(format!(
            "lobby.default_max_players must be between lobby.min_players and {MAX_PLAYERS_CEILING}"
        ));
    }
    if config.lobby.offpeak_start_hour >= 24 || config.lobby.offpeak_end_hour > 24 {
        problems.push("lobby.offpeak hours must be within 0..24".to_string());
    }
    if config.lobby.heartbeat_db_debounce_secs >= config.lobby.stale_member_threshold_secs {
        problems.push(
            "lobby.heartbeat_db_debounce_secs must be well below the stale member threshold"
                .to_string(),
        );
    }
    if !config.lobby.public_base_url.starts_with("http") {
        problems.push("lobby.public_base_url must be an absolute http(s) origin".to_string());
    }

    for entry in &config.security.api_keys {
        let hash_ok =
            entry.key_hash.len() == 64 && entry.key_hash.bytes().all(|b| b.is_ascii_hexdigit());
        if !hash_ok {
            problems.push(format!(
                "security.api_keys entry '{}' must carry a 64-hex-character SHA-256 key_hash",
                entry.service
            ));
        }
        if entry.service.is_empty() {
            problems.push("security.api_keys entries must name a service".to_string());
        }
    }

    if config.security.production {
        if config.security.cors_origins == "*" {
            problems.push(
                "production mode requires explicit security.cors_origins, not '*'".to_string(),
            );
        }
        if config.security.api_keys.is_empty() {
            problems.push(
                "production mode requires at least one configured game-service API key"
                    .to_string(),
            );
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("\n"))
    }
}
