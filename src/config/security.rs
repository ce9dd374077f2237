//! Security configuration: CORS, API keys, per-IP rate ceilings.

use serde::{Deserialize, Serialize};

use super::defaults::{
    default_cors_origins, default_return_status_rate_per_minute,
    default_session_lookup_rate_per_minute,
};

/// Configured game-service API key. Keys are issued as
/// `gb_<service>_<64 hex>` and stored here **hashed** (SHA-256 hex of the
/// full key string); the plaintext never appears in configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiKeyEntry {
    /// Service identifier, matched against a room's `current_game` to scope
    /// the key unless `all_rooms` is set.
    pub service: String,
    /// SHA-256 hex digest of the full key string.
    pub key_hash: String,
    /// Whether the key may act on any room regardless of its current game.
    #[serde(default)]
    pub all_rooms: bool,
}

/// Security configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    /// Comma-separated allowed CORS origins, or `*`.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    /// Production mode omits `debug` fields from error payloads and tightens
    /// configuration validation.
    #[serde(default)]
    pub production: bool,
    /// Game-service API keys (hashed at rest).
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
    /// Per-IP ceiling for session-token lookups.
    #[serde(default = "default_session_lookup_rate_per_minute")]
    pub session_lookup_rate_per_minute: u32,
    /// Per-IP ceiling for return-status polls.
    #[serde(default = "default_return_status_rate_per_minute")]
    pub return_status_rate_per_minute: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_origins: default_cors_origins(),
            production: false,
            api_keys: Vec::new(),
            session_lookup_rate_per_minute: default_session_lookup_rate_per_minute(),
            return_status_rate_per_minute: default_return_status_rate_per_minute(),
        }
    }
}
