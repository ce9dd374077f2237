use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::protocol::{
    Member, MemberLocation, Room, RoomEvent, RoomId, RoomStatus, UserId, UserProfile,
};
use crate::session::SessionRecord;

mod memory;

pub use memory::InMemoryStore;

/// Outcome of the atomic member upsert RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberUpsertOutcome {
    /// No prior row existed; a fresh membership was inserted.
    Inserted,
    /// A prior row existed and was flipped back to connected, keeping its
    /// original `joined_at`.
    Rejoined,
}

/// A member flipped to disconnected by the stale sweep.
#[derive(Debug, Clone)]
pub struct StaleMember {
    pub room_id: RoomId,
    pub room_code: String,
    pub user_id: UserId,
    pub was_host: bool,
}

/// Summary of one room-reaper pass.
#[derive(Debug, Default, Clone)]
pub struct AbandonSweepOutcome {
    /// Rooms flipped to `Abandoned` during this pass.
    pub abandoned: Vec<Room>,
}

/// Storage abstraction for the lobby core.
///
/// The manager serializes all mutations for a room under the per-room lock,
/// so most operations are simple row reads/writes. The exceptions are the
/// atomic RPCs (`upsert_member`, `promote_earliest_connected`,
/// `sweep_stale_members`, `sweep_abandonable_rooms`) which re-check their
/// predicates inside the store so they stay correct even against writers
/// outside the room lock (heartbeats, reapers).
#[async_trait]
pub trait LobbyStore: Send + Sync {
    /// Initialize the backing storage (run migrations, open pools).
    async fn initialize(&self) -> Result<()>;

    // --- users ---------------------------------------------------------------

    /// Insert or refresh a user profile; `last_seen` is always bumped.
    async fn upsert_user(&self, profile: UserProfile) -> Result<()>;

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserProfile>>;

    // --- rooms ---------------------------------------------------------------

    /// Insert a room; fails if the room code is already taken.
    async fn insert_room(&self, room: Room) -> Result<Room>;

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>>;

    async fn get_room_by_code(&self, room_code: &str) -> Result<Option<Room>>;

    /// Set the room status; returns false if the room does not exist.
    async fn set_room_status(&self, room_id: &RoomId, status: RoomStatus) -> Result<bool>;

    /// Record the host's game selection.
    async fn set_current_game(
        &self,
        room_id: &RoomId,
        game_type: &str,
        settings: Option<serde_json::Value>,
    ) -> Result<bool>;

    /// Transition to `InGame`, stamping `game_started_at` and clearing any
    /// pending return from a previous cycle.
    async fn mark_game_started(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<bool>;

    /// Bump `last_activity`.
    async fn touch_room(&self, room_id: &RoomId) -> Result<()>;

    /// Arm the pending-return flag. Returns false (and changes nothing) when
    /// a return is already pending, which is how repeated `return_to_lobby`
    /// calls stay idempotent.
    async fn set_pending_return(
        &self,
        room_id: &RoomId,
        initiated_at: DateTime<Utc>,
        in_progress_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Clear the pending-return flag; returns whether it was set.
    async fn clear_pending_return(&self, room_id: &RoomId) -> Result<bool>;

    /// Extend the return grace window (also set on game->lobby transitions).
    async fn set_return_grace(&self, room_id: &RoomId, until: DateTime<Utc>) -> Result<()>;

    /// Record or clear the host auto-transfer deadline.
    async fn set_host_transfer_deadline(
        &self,
        room_id: &RoomId,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<()>;

    // --- members -------------------------------------------------------------

    /// Atomic RPC: insert a fresh membership or reconnect an existing row.
    /// A reconnect keeps the original `joined_at`, adopts the new display
    /// name, and moves the member to the lobby.
    async fn upsert_member(&self, member: Member) -> Result<MemberUpsertOutcome>;

    async fn get_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<Option<Member>>;

    async fn list_members(&self, room_id: &RoomId) -> Result<Vec<Member>>;

    /// Remove a member row (explicit leave or kick).
    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<Option<Member>>;

    /// Move a member between lobby/game/disconnected, maintaining the
    /// connectivity invariant.
    async fn set_member_location(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        location: MemberLocation,
    ) -> Result<bool>;

    async fn set_member_ready(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        is_ready: bool,
    ) -> Result<bool>;

    /// Persist a heartbeat. Monotonic: an older timestamp never overwrites a
    /// newer one (the sweep races this write).
    async fn record_member_ping(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Atomic RPC: swap host role from `from` to `to` and repoint the room's
    /// `host_id`. Fails (returns false) unless `to` is a connected member.
    async fn transfer_host(&self, room_id: &RoomId, from: &UserId, to: &UserId) -> Result<bool>;

    /// Atomic RPC: promote the earliest-joined connected member to host.
    /// Returns `(old_host, new_host)` or None when no connected member
    /// exists or the old host reconnected in the meantime.
    async fn promote_earliest_connected(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<(UserId, UserId)>>;

    /// Atomic RPC: flip members whose `last_ping` predates `cutoff` to
    /// disconnected. The predicate is re-checked row by row inside the
    /// store, so a fresh heartbeat racing the sweep wins.
    async fn sweep_stale_members(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleMember>>;

    // --- room reaping --------------------------------------------------------

    /// Mark rooms abandoned: (no connected members AND `last_activity` <
    /// `idle_cutoff`) OR (`created_at` < `age_cutoff` AND not in-game with
    /// connected members). A room with a connected member located in the
    /// external game is never flipped.
    async fn sweep_abandonable_rooms(
        &self,
        idle_cutoff: DateTime<Utc>,
        age_cutoff: DateTime<Utc>,
    ) -> Result<AbandonSweepOutcome>;

    /// Delete rooms that have sat in a terminal status (`Abandoned` or
    /// `Finished`) since before `cutoff`. Returns the deleted rooms' ids
    /// and codes so callers can drop per-room coordination state.
    async fn purge_abandoned_rooms(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<(RoomId, String)>>;

    /// Rooms whose pending-return flag is armed, for the reaper's
    /// clear-on-timeout pass.
    async fn list_rooms_pending_return(&self) -> Result<Vec<Room>>;

    // --- events --------------------------------------------------------------

    async fn append_event(&self, event: RoomEvent) -> Result<()>;

    async fn events_for_room(&self, room_id: &RoomId) -> Result<Vec<RoomEvent>>;

    // --- session tokens ------------------------------------------------------

    /// Insert a session row keyed by token digest.
    async fn insert_session(&self, record: SessionRecord) -> Result<()>;

    /// Look up a session by token digest. Returns None when absent or
    /// expired at `now`; a hit updates `last_accessed`.
    async fn resolve_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>>;

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    // --- misc ----------------------------------------------------------------

    async fn health_check(&self) -> bool;

    /// Total live (non-terminal) room count, for metrics and tests.
    async fn count_active_rooms(&self) -> Result<usize>;
}
