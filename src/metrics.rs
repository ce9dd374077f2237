use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide counters exposed on `GET /metrics`.
///
/// Plain relaxed atomics: the counters feed dashboards, not control flow.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    active_connections: AtomicI64,
    rooms_created: AtomicU64,
    members_joined: AtomicU64,
    members_left: AtomicU64,
    members_kicked: AtomicU64,
    games_started: AtomicU64,
    games_finished: AtomicU64,
    host_transfers: AtomicU64,
    returns_initiated: AtomicU64,
    return_polls_served: AtomicU64,
    stale_members_reaped: AtomicU64,
    rooms_abandoned: AtomicU64,
    rooms_purged: AtomicU64,
    sessions_minted: AtomicU64,
    sessions_resolved: AtomicU64,
    sessions_purged: AtomicU64,
    heartbeats_received: AtomicU64,
    heartbeat_db_writes: AtomicU64,
    heartbeat_db_skipped: AtomicU64,
    frames_dropped: AtomicU64,
    messages_rate_limited: AtomicU64,
}

/// Point-in-time view of the counters, serialized as the `/metrics` body.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub active_connections: i64,
    pub rooms_created: u64,
    pub members_joined: u64,
    pub members_left: u64,
    pub members_kicked: u64,
    pub games_started: u64,
    pub games_finished: u64,
    pub host_transfers: u64,
    pub returns_initiated: u64,
    pub return_polls_served: u64,
    pub stale_members_reaped: u64,
    pub rooms_abandoned: u64,
    pub rooms_purged: u64,
    pub sessions_minted: u64,
    pub sessions_resolved: u64,
    pub sessions_purged: u64,
    pub heartbeats_received: u64,
    pub heartbeat_db_writes: u64,
    pub heartbeat_db_skipped: u64,
    pub frames_dropped: u64,
    pub messages_rate_limited: u64,
}

macro_rules! counter {
    ($inc:ident, $add:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        #[allow(dead_code)]
        pub fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    counter!(increment_rooms_created, add_rooms_created, rooms_created);
    counter!(increment_members_joined, add_members_joined, members_joined);
    counter!(increment_members_left, add_members_left, members_left);
    counter!(increment_members_kicked, add_members_kicked, members_kicked);
    counter!(increment_games_started, add_games_started, games_started);
    counter!(increment_games_finished, add_games_finished, games_finished);
    counter!(increment_host_transfers, add_host_transfers, host_transfers);
    counter!(
        increment_returns_initiated,
        add_returns_initiated,
        returns_initiated
    );
    counter!(
        increment_return_polls_served,
        add_return_polls_served,
        return_polls_served
    );
    counter!(
        increment_stale_members_reaped,
        add_stale_members_reaped,
        stale_members_reaped
    );
    counter!(increment_rooms_abandoned, add_rooms_abandoned, rooms_abandoned);
    counter!(increment_rooms_purged, add_rooms_purged, rooms_purged);
    counter!(increment_sessions_minted, add_sessions_minted, sessions_minted);
    counter!(
        increment_sessions_resolved,
        add_sessions_resolved,
        sessions_resolved
    );
    counter!(increment_sessions_purged, add_sessions_purged, sessions_purged);
    counter!(
        increment_heartbeats_received,
        add_heartbeats_received,
        heartbeats_received
    );
    counter!(
        increment_heartbeat_db_writes,
        add_heartbeat_db_writes,
        heartbeat_db_writes
    );
    counter!(
        increment_heartbeat_db_skipped,
        add_heartbeat_db_skipped,
        heartbeat_db_skipped
    );
    counter!(increment_frames_dropped, add_frames_dropped, frames_dropped);
    counter!(
        increment_messages_rate_limited,
        add_messages_rate_limited,
        messages_rate_limited
    );

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
            members_joined: self.members_joined.load(Ordering::Relaxed),
            members_left: self.members_left.load(Ordering::Relaxed),
            members_kicked: self.members_kicked.load(Ordering::Relaxed),
            games_started: self.games_started.load(Ordering::Relaxed),
            games_finished: self.games_finished.load(Ordering::Relaxed),
            host_transfers: self.host_transfers.load(Ordering::Relaxed),
            returns_initiated: self.returns_initiated.load(Ordering::Relaxed),
            return_polls_served: self.return_polls_served.load(Ordering::Relaxed),
            stale_members_reaped: self.stale_members_reaped.load(Ordering::Relaxed),
            rooms_abandoned: self.rooms_abandoned.load(Ordering::Relaxed),
            rooms_purged: self.rooms_purged.load(Ordering::Relaxed),
            sessions_minted: self.sessions_minted.load(Ordering::Relaxed),
            sessions_resolved: self.sessions_resolved.load(Ordering::Relaxed),
            sessions_purged: self.sessions_purged.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            heartbeat_db_writes: self.heartbeat_db_writes.load(Ordering::Relaxed),
            heartbeat_db_skipped: self.heartbeat_db_skipped.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            messages_rate_limited: self.messages_rate_limited.load(Ordering::Relaxed),
        }
    }
}
