//! Lobby behavior configuration: timings, grace windows, reaper thresholds.

use serde::{Deserialize, Serialize};

use super::defaults::{
    default_abandoned_purge_grace_secs, default_game_url_template,
    default_heartbeat_db_debounce_secs, default_heartbeat_interval_secs, default_host_grace_secs,
    default_max_players, default_max_session_age_secs, default_min_players,
    default_offpeak_age_reap_secs, default_offpeak_end_hour, default_offpeak_idle_reap_secs,
    default_offpeak_start_hour, default_public_base_url, default_return_clear_after_secs,
    default_return_grace_secs, default_room_age_reap_secs, default_room_idle_reap_secs,
    default_room_reap_interval_secs, default_session_purge_interval_secs,
    default_session_token_ttl_secs, default_stale_member_threshold_secs,
    default_stale_sweep_interval_secs,
};

/// Lobby timing and capacity configuration. All durations are seconds.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LobbyConfig {
    /// Reject rejoins on memberships older than this.
    #[serde(default = "default_max_session_age_secs")]
    pub max_session_age_secs: u64,
    /// Expected client heartbeat cadence.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Minimum gap between persisted ping writes.
    #[serde(default = "default_heartbeat_db_debounce_secs")]
    pub heartbeat_db_debounce_secs: u64,
    /// Time without a ping before a member is marked disconnected.
    #[serde(default = "default_stale_member_threshold_secs")]
    pub stale_member_threshold_secs: u64,
    /// Cadence of the stale-member reconciler.
    #[serde(default = "default_stale_sweep_interval_secs")]
    pub stale_sweep_interval_secs: u64,
    /// Window for a disconnected host to re-attach before auto-transfer.
    #[serde(default = "default_host_grace_secs")]
    pub host_grace_secs: u64,
    /// Window during which game->lobby navigations ignore disconnects.
    #[serde(default = "default_return_grace_secs")]
    pub return_grace_secs: u64,
    /// A pending return clears after this much time since initiation.
    #[serde(default = "default_return_clear_after_secs")]
    pub return_clear_after_secs: u64,
    /// Cadence of the periodic room reaper.
    #[serde(default = "default_room_reap_interval_secs")]
    pub room_reap_interval_secs: u64,
    /// Idle threshold for the periodic room reaper.
    #[serde(default = "default_room_idle_reap_secs")]
    pub room_idle_reap_secs: u64,
    /// Max room age for the periodic room reaper.
    #[serde(default = "default_room_age_reap_secs")]
    pub room_age_reap_secs: u64,
    /// Tighter idle threshold used during the off-peak window.
    #[serde(default = "default_offpeak_idle_reap_secs")]
    pub offpeak_idle_reap_secs: u64,
    /// Tighter max age used during the off-peak window.
    #[serde(default = "default_offpeak_age_reap_secs")]
    pub offpeak_age_reap_secs: u64,
    /// Off-peak window start, hour of day UTC (inclusive).
    #[serde(default = "default_offpeak_start_hour")]
    pub offpeak_start_hour: u32,
    /// Off-peak window end, hour of day UTC (exclusive).
    #[serde(default = "default_offpeak_end_hour")]
    pub offpeak_end_hour: u32,
    /// Abandoned rooms are deleted only after this grace period.
    #[serde(default = "default_abandoned_purge_grace_secs")]
    pub abandoned_purge_grace_secs: u64,
    /// Session token validity.
    #[serde(default = "default_session_token_ttl_secs")]
    pub session_token_ttl_secs: u64,
    /// Cadence of the expired-token purger.
    #[serde(default = "default_session_purge_interval_secs")]
    pub session_purge_interval_secs: u64,
    /// Minimum connected members required to start a game.
    #[serde(default = "default_min_players")]
    pub min_players: u8,
    /// Room size used when the creator does not specify one.
    #[serde(default = "default_max_players")]
    pub default_max_players: u8,
    /// Public origin used to build lobby return URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// URL template for games without a registry entry; `{game}` is replaced
    /// with the game identifier.
    #[serde(default = "default_game_url_template")]
    pub game_url_template: String,
    /// Explicit game id -> base URL mappings.
    #[serde(default)]
    pub games: Vec<GameEntry>,
}

/// Registry entry mapping a game identifier to its base URL.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GameEntry {
    pub id: String,
    pub url: String,
}

impl LobbyConfig {
    /// Resolve the base URL for a game, falling back to the template.
    pub fn game_base_url(&self, game_type: &str) -> String {
        self.games
            .iter()
            .find(|entry| entry.id == game_type)
            .map(|entry| entry.url.clone())
            .unwrap_or_else(|| self.game_url_template.replace("{game}", game_type))
    }
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            max_session_age_secs: default_max_session_age_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_db_debounce_secs: default_heartbeat_db_debounce_secs(),
            stale_member_threshold_secs: default_stale_member_threshold_secs(),
            stale_sweep_interval_secs: default_stale_sweep_interval_secs(),
            host_grace_secs: default_host_grace_secs(),
            return_grace_secs: default_return_grace_secs(),
            return_clear_after_secs: default_return_clear_after_secs(),
            room_reap_interval_secs: default_room_reap_interval_secs(),
            room_idle_reap_secs: default_room_idle_reap_secs(),
            room_age_reap_secs: default_room_age_reap_secs(),
            offpeak_idle_reap_secs: default_offpeak_idle_reap_secs(),
            offpeak_age_reap_secs: default_offpeak_age_reap_secs(),
            offpeak_start_hour: default_offpeak_start_hour(),
            offpeak_end_hour: default_offpeak_end_hour(),
            abandoned_purge_grace_secs: default_abandoned_purge_grace_secs(),
            session_token_ttl_secs: default_session_token_ttl_secs(),
            session_purge_interval_secs: default_session_purge_interval_secs(),
            min_players: default_min_players(),
            default_max_players: default_max_players(),
            public_base_url: default_public_base_url(),
            game_url_template: default_game_url_template(),
            games: Vec::new(),
        }
    }
}
