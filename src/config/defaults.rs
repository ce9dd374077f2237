//! Default value functions referenced by the serde derives in this module.
//!
//! Keeping them in one place makes the configuration surface auditable:
//! every tunable and its default is listed here.

pub fn default_port() -> u16 {
    8080
}

// --- lobby timings -----------------------------------------------------------

/// Reject rejoins on memberships older than this (24 h).
pub fn default_max_session_age_secs() -> u64 {
    24 * 60 * 60
}

/// Expected client heartbeat cadence.
pub fn default_heartbeat_interval_secs() -> u64 {
    25
}

/// Minimum gap between persisted ping writes.
pub fn default_heartbeat_db_debounce_secs() -> u64 {
    10
}

/// Time without a ping before a member is flipped to disconnected (5 min).
pub fn default_stale_member_threshold_secs() -> u64 {
    5 * 60
}

/// Cadence of the stale-member reconciler.
pub fn default_stale_sweep_interval_secs() -> u64 {
    30
}

/// Window for a disconnected host to re-attach before auto-transfer.
pub fn default_host_grace_secs() -> u64 {
    30
}

/// Window during which game->lobby navigations ignore disconnects.
pub fn default_return_grace_secs() -> u64 {
    30
}

/// A pending return clears once this much time passed since initiation (5 min).
pub fn default_return_clear_after_secs() -> u64 {
    5 * 60
}

/// Cadence of the periodic room reaper.
pub fn default_room_reap_interval_secs() -> u64 {
    10 * 60
}

/// Idle threshold for the periodic room reaper (30 min).
pub fn default_room_idle_reap_secs() -> u64 {
    30 * 60
}

/// Max age for the periodic room reaper (24 h).
pub fn default_room_age_reap_secs() -> u64 {
    24 * 60 * 60
}

/// Tighter off-peak idle threshold (15 min).
pub fn default_offpeak_idle_reap_secs() -> u64 {
    15 * 60
}

/// Tighter off-peak max age (12 h).
pub fn default_offpeak_age_reap_secs() -> u64 {
    12 * 60 * 60
}

/// Off-peak window bounds, hours UTC.
pub fn default_offpeak_start_hour() -> u32 {
    2
}

pub fn default_offpeak_end_hour() -> u32 {
    6
}

/// Abandoned rooms are deleted only after this grace period (1 h).
pub fn default_abandoned_purge_grace_secs() -> u64 {
    60 * 60
}

/// Session token validity (3 h).
pub fn default_session_token_ttl_secs() -> u64 {
    3 * 60 * 60
}

/// Cadence of the expired-token purger.
pub fn default_session_purge_interval_secs() -> u64 {
    60 * 60
}

pub fn default_min_players() -> u8 {
    2
}

pub fn default_max_players() -> u8 {
    10
}

/// Public origin used to build lobby return URLs.
pub fn default_public_base_url() -> String {
    "https://gamebuddies.io".to_string()
}

/// URL template used for games without a registry entry; `{game}` is
/// substituted with the game identifier.
pub fn default_game_url_template() -> String {
    "https://{game}.gamebuddies.io".to_string()
}

// --- edge --------------------------------------------------------------------

/// Per-connection inbound message ceiling.
pub fn default_max_messages_per_second() -> u32 {
    30
}

pub fn default_outbound_queue_capacity() -> usize {
    64
}

pub fn default_max_message_size() -> usize {
    65536
}

/// How long a fresh connection may wait before its `USER.IDENTIFY`.
pub fn default_identify_timeout_secs() -> u64 {
    30
}

// --- security ----------------------------------------------------------------

pub fn default_cors_origins() -> String {
    "*".to_string()
}

/// Per-IP ceiling for `GET /api/game-sessions/{token}`.
pub fn default_session_lookup_rate_per_minute() -> u32 {
    60
}

/// Per-IP ceiling for `GET /api/v2/rooms/{code}/return-status`.
pub fn default_return_status_rate_per_minute() -> u32 {
    30
}

// --- logging -----------------------------------------------------------------

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "server.log".to_string()
}

pub fn default_log_rotation() -> String {
    "daily".to_string()
}
