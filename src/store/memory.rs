use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::protocol::{
    Member, MemberLocation, MemberRole, Room, RoomEvent, RoomId, RoomStatus, UserId, UserProfile,
};
use crate::session::SessionRecord;

use super::{AbandonSweepOutcome, LobbyStore, MemberUpsertOutcome, StaleMember};

/// Per-room cap on retained audit events.
const MAX_EVENTS_PER_ROOM: usize = 1000;

/// In-memory store for tests and single-instance deployments.
///
/// Lock ordering, where multiple tables are held at once:
/// rooms -> room_codes -> members -> events -> sessions.
/// Holding the relevant write locks together makes each multi-table
/// operation atomic: no task observes a room without its code mapping or a
/// cascade half applied.
pub struct InMemoryStore {
    users: RwLock<HashMap<UserId, UserProfile>>,
    rooms: RwLock<HashMap<RoomId, Room>>,
    room_codes: RwLock<HashMap<String, RoomId>>,
    members: RwLock<HashMap<RoomId, HashMap<UserId, Member>>>,
    events: RwLock<HashMap<RoomId, Vec<RoomEvent>>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            room_codes: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LobbyStore for InMemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_user(&self, mut profile: UserProfile) -> Result<()> {
        profile.last_seen = Utc::now();
        let mut users = self.users.write().await;
        users.insert(profile.id, profile);
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserProfile>> {
        let users = self.users.read().await;
        Ok(users.get(user_id).cloned())
    }

    async fn insert_room(&self, room: Room) -> Result<Room> {
        let mut rooms = self.rooms.write().await;
        let mut room_codes = self.room_codes.write().await;

        // Uniqueness checked under the write locks: no TOCTOU gap.
        if room_codes.contains_key(&room.code) {
            anyhow::bail!("Room code {} already exists", room.code);
        }

        room_codes.insert(room.code.clone(), room.id);
        rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room_id).cloned())
    }

    async fn get_room_by_code(&self, room_code: &str) -> Result<Option<Room>> {
        let rooms = self.rooms.read().await;
        let room_codes = self.room_codes.read().await;
        Ok(room_codes
            .get(room_code)
            .and_then(|room_id| rooms.get(room_id))
            .cloned())
    }

    async fn set_room_status(&self, room_id: &RoomId, status: RoomStatus) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.status = status;
            room.touch();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn set_current_game(
        &self,
        room_id: &RoomId,
        game_type: &str,
        settings: Option<serde_json::Value>,
    ) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.current_game = Some(game_type.to_string());
            room.game_settings = settings;
            room.touch();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn mark_game_started(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.status = RoomStatus::InGame;
            room.game_started_at = Some(at);
            // A fresh start invalidates any return cycle left over.
            room.metadata.pending_return = false;
            room.metadata.return_initiated_at = None;
            room.metadata.return_in_progress_until = None;
            room.touch();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn touch_room(&self, room_id: &RoomId) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.touch();
        }
        Ok(())
    }

    async fn set_pending_return(
        &self,
        room_id: &RoomId,
        initiated_at: DateTime<Utc>,
        in_progress_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return Ok(false);
        };
        if room.metadata.pending_return {
            return Ok(false);
        }
        room.metadata.pending_return = true;
        room.metadata.return_initiated_at = Some(initiated_at);
        room.metadata.return_in_progress_until = Some(in_progress_until);
        room.status = RoomStatus::Returning;
        room.touch();
        Ok(true)
    }

    async fn clear_pending_return(&self, room_id: &RoomId) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return Ok(false);
        };
        let was_pending = room.metadata.pending_return;
        room.metadata.pending_return = false;
        room.metadata.return_initiated_at = None;
        if room.status == RoomStatus::Returning {
            room.status = RoomStatus::Lobby;
        }
        // return_in_progress_until is left to expire on its own so late
        // game->lobby navigations stay covered.
        Ok(was_pending)
    }

    async fn set_return_grace(&self, room_id: &RoomId, until: DateTime<Utc>) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            let extended = match room.metadata.return_in_progress_until {
                Some(current) => until > current,
                None => true,
            };
            if extended {
                room.metadata.return_in_progress_until = Some(until);
            }
        }
        Ok(())
    }

    async fn set_host_transfer_deadline(
        &self,
        room_id: &RoomId,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.metadata.host_transfer_pending_until = deadline;
        }
        Ok(())
    }

    async fn upsert_member(&self, member: Member) -> Result<MemberUpsertOutcome> {
        let mut members = self.members.write().await;
        let room_members = members.entry(member.room_id).or_default();
        match room_members.get_mut(&member.user_id) {
            Some(existing) => {
                existing.display_name = member.display_name;
                existing.set_location(MemberLocation::Lobby);
                existing.last_ping = Utc::now();
                Ok(MemberUpsertOutcome::Rejoined)
            }
            None => {
                room_members.insert(member.user_id, member);
                Ok(MemberUpsertOutcome::Inserted)
            }
        }
    }

    async fn get_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<Option<Member>> {
        let members = self.members.read().await;
        Ok(members
            .get(room_id)
            .and_then(|room_members| room_members.get(user_id))
            .cloned())
    }

    async fn list_members(&self, room_id: &RoomId) -> Result<Vec<Member>> {
        let members = self.members.read().await;
        let mut list: Vec<Member> = members
            .get(room_id)
            .map(|room_members| room_members.values().cloned().collect())
            .unwrap_or_default();
        list.sort_by_key(|m| m.joined_at);
        Ok(list)
    }

    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<Option<Member>> {
        let mut members = self.members.write().await;
        let removed = members
            .get_mut(room_id)
            .and_then(|room_members| room_members.remove(user_id));
        if let Some(room_members) = members.get(room_id) {
            if room_members.is_empty() {
                members.remove(room_id);
            }
        }
        Ok(removed)
    }

    async fn set_member_location(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        location: MemberLocation,
    ) -> Result<bool> {
        let mut members = self.members.write().await;
        if let Some(member) = members
            .get_mut(room_id)
            .and_then(|room_members| room_members.get_mut(user_id))
        {
            member.set_location(location);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn set_member_ready(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        is_ready: bool,
    ) -> Result<bool> {
        let mut members = self.members.write().await;
        if let Some(member) = members
            .get_mut(room_id)
            .and_then(|room_members| room_members.get_mut(user_id))
        {
            member.is_ready = is_ready;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn record_member_ping(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut members = self.members.write().await;
        if let Some(member) = members
            .get_mut(room_id)
            .and_then(|room_members| room_members.get_mut(user_id))
        {
            if at > member.last_ping {
                member.last_ping = at;
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn transfer_host(&self, room_id: &RoomId, from: &UserId, to: &UserId) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        let mut members = self.members.write().await;

        let Some(room) = rooms.get_mut(room_id) else {
            return Ok(false);
        };
        let Some(room_members) = members.get_mut(room_id) else {
            return Ok(false);
        };

        // Target must be a connected member before anything is touched.
        let target_ok = room_members
            .get(to)
            .map(|m| m.is_connected)
            .unwrap_or(false);
        if !target_ok {
            return Ok(false);
        }

        if let Some(old_host) = room_members.get_mut(from) {
            if old_host.role == MemberRole::Host {
                old_host.role = MemberRole::Player;
            }
        }
        if let Some(new_host) = room_members.get_mut(to) {
            new_host.role = MemberRole::Host;
        }
        room.host_id = *to;
        room.metadata.host_transfer_pending_until = None;
        room.touch();
        Ok(true)
    }

    async fn promote_earliest_connected(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<(UserId, UserId)>> {
        let mut rooms = self.rooms.write().await;
        let mut members = self.members.write().await;

        let Some(room) = rooms.get_mut(room_id) else {
            return Ok(None);
        };
        let Some(room_members) = members.get_mut(room_id) else {
            return Ok(None);
        };

        let old_host = room.host_id;

        // The grace period is void if the host made it back.
        if room_members
            .get(&old_host)
            .map(|m| m.is_connected)
            .unwrap_or(false)
        {
            room.metadata.host_transfer_pending_until = None;
            return Ok(None);
        }

        let successor = room_members
            .values()
            .filter(|m| m.is_connected && m.user_id != old_host)
            .min_by_key(|m| m.joined_at)
            .map(|m| m.user_id);

        let Some(new_host) = successor else {
            room.metadata.host_transfer_pending_until = None;
            return Ok(None);
        };

        if let Some(previous) = room_members.get_mut(&old_host) {
            previous.role = MemberRole::Player;
        }
        if let Some(promoted) = room_members.get_mut(&new_host) {
            promoted.role = MemberRole::Host;
        }
        room.host_id = new_host;
        room.metadata.host_transfer_pending_until = None;
        room.touch();
        Ok(Some((old_host, new_host)))
    }

    async fn sweep_stale_members(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleMember>> {
        let rooms = self.rooms.read().await;
        let mut members = self.members.write().await;

        let mut flipped = Vec::new();
        for (room_id, room_members) in members.iter_mut() {
            let Some(room) = rooms.get(room_id) else {
                continue;
            };
            for member in room_members.values_mut() {
                // Predicate re-checked under the write lock: a heartbeat
                // that landed after the caller computed the cutoff wins.
                if member.is_connected && member.last_ping < cutoff {
                    member.mark_disconnected();
                    flipped.push(StaleMember {
                        room_id: *room_id,
                        room_code: room.code.clone(),
                        user_id: member.user_id,
                        was_host: room.host_id == member.user_id,
                    });
                }
            }
        }
        Ok(flipped)
    }

    async fn sweep_abandonable_rooms(
        &self,
        idle_cutoff: DateTime<Utc>,
        age_cutoff: DateTime<Utc>,
    ) -> Result<AbandonSweepOutcome> {
        let mut rooms = self.rooms.write().await;
        let members = self.members.read().await;

        let mut outcome = AbandonSweepOutcome::default();
        for room in rooms.values_mut() {
            if room.status.is_terminal() {
                continue;
            }

            let empty = HashMap::new();
            let room_members = members.get(&room.id).unwrap_or(&empty);
            let any_connected = room_members.values().any(|m| m.is_connected);
            let any_in_game = room_members
                .values()
                .any(|m| m.is_connected && m.current_location == MemberLocation::Game);

            // Never reap a room with a connected member inside the game.
            if any_in_game {
                continue;
            }

            let idle_expired = !any_connected && room.last_activity < idle_cutoff;
            let in_game_with_players = room.status == RoomStatus::InGame && any_connected;
            let age_expired = room.created_at < age_cutoff && !in_game_with_players;

            if idle_expired || age_expired {
                room.status = RoomStatus::Abandoned;
                room.metadata.pending_return = false;
                room.metadata.return_initiated_at = None;
                room.metadata.host_transfer_pending_until = None;
                // last_activity doubles as the abandonment timestamp for the
                // purge grace period.
                room.touch();
                outcome.abandoned.push(room.clone());
            }
        }
        Ok(outcome)
    }

    async fn purge_abandoned_rooms(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(RoomId, String)>> {
        let mut rooms = self.rooms.write().await;
        let mut room_codes = self.room_codes.write().await;
        let mut members = self.members.write().await;
        let mut events = self.events.write().await;
        let mut sessions = self.sessions.write().await;

        let doomed: Vec<(RoomId, String)> = rooms
            .values()
            .filter(|room| room.status.is_terminal() && room.last_activity < cutoff)
            .map(|room| (room.id, room.code.clone()))
            .collect();

        for (room_id, code) in &doomed {
            rooms.remove(room_id);
            room_codes.remove(code);
            members.remove(room_id);
            events.remove(room_id);
            sessions.retain(|_, record| record.room_code != *code);
        }
        Ok(doomed)
    }

    async fn list_rooms_pending_return(&self) -> Result<Vec<Room>> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .values()
            .filter(|room| room.metadata.pending_return)
            .cloned()
            .collect())
    }

    async fn append_event(&self, event: RoomEvent) -> Result<()> {
        let mut events = self.events.write().await;
        let room_events = events.entry(event.room_id).or_default();
        room_events.push(event);
        if room_events.len() > MAX_EVENTS_PER_ROOM {
            let excess = room_events.len() - MAX_EVENTS_PER_ROOM;
            room_events.drain(..excess);
        }
        Ok(())
    }

    async fn events_for_room(&self, room_id: &RoomId) -> Result<Vec<RoomEvent>> {
        let events = self.events.read().await;
        Ok(events.get(room_id).cloned().unwrap_or_default())
    }

    async fn insert_session(&self, record: SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&record.token_hash) {
            anyhow::bail!("session token collision");
        }
        sessions.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn resolve_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token_hash) {
            Some(record) if now <= record.expires_at => {
                record.last_accessed = now;
                Ok(Some(record.clone()))
            }
            // Expired rows stay for the purger; they never resolve.
            _ => Ok(None),
        }
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn count_active_rooms(&self) -> Result<usize> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .values()
            .filter(|room| !room.status.is_terminal())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoomOptions;
    use std::collections::HashSet;
    use std::sync::Arc;
    use uuid::Uuid;

    fn test_room(code: &str, host_id: UserId) -> Room {
        Room::new(code.to_string(), host_id, 10, &RoomOptions::default())
    }

    fn test_member(room_id: RoomId, name: &str, role: MemberRole) -> Member {
        Member::new(room_id, Uuid::new_v4(), name.to_string(), role)
    }

    #[tokio::test]
    async fn insert_room_rejects_code_collision() {
        let store = InMemoryStore::new();
        store
            .insert_room(test_room("ABC234", Uuid::new_v4()))
            .await
            .expect("first room");

        let result = store.insert_room(test_room("ABC234", Uuid::new_v4())).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn concurrent_same_code_only_one_wins() {
        let store = Arc::new(InMemoryStore::new());
        let task_count = 10;
        let barrier = Arc::new(tokio::sync::Barrier::new(task_count));

        let mut handles = Vec::with_capacity(task_count);
        for _ in 0..task_count {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store.insert_room(test_room("RACE23", Uuid::new_v4())).await
            }));
        }

        let mut successes = 0usize;
        for handle in handles {
            if handle.await.expect("task should not panic").is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1, "exactly one insert should win the race");
    }

    #[tokio::test]
    async fn rooms_resolve_by_id_and_code() {
        let store = InMemoryStore::new();
        let room = store
            .insert_room(test_room("ABC234", Uuid::new_v4()))
            .await
            .unwrap();

        let by_id = store.get_room(&room.id).await.unwrap().unwrap();
        let by_code = store.get_room_by_code("ABC234").await.unwrap().unwrap();
        assert_eq!(by_id.id, by_code.id);
    }

    #[tokio::test]
    async fn upsert_member_reconnects_existing_rows() {
        let store = InMemoryStore::new();
        let room = store
            .insert_room(test_room("ABC234", Uuid::new_v4()))
            .await
            .unwrap();

        let mut member = test_member(room.id, "Dana", MemberRole::Host);
        let user_id = member.user_id;
        let original_joined_at = member.joined_at;

        assert_eq!(
            store.upsert_member(member.clone()).await.unwrap(),
            MemberUpsertOutcome::Inserted
        );

        // Simulate disconnection, then a rejoin under a new name.
        store
            .set_member_location(&room.id, &user_id, MemberLocation::Disconnected)
            .await
            .unwrap();
        member.display_name = "Dana2".to_string();
        assert_eq!(
            store.upsert_member(member).await.unwrap(),
            MemberUpsertOutcome::Rejoined
        );

        let row = store.get_member(&room.id, &user_id).await.unwrap().unwrap();
        assert!(row.is_connected);
        assert_eq!(row.current_location, MemberLocation::Lobby);
        assert_eq!(row.display_name, "Dana2");
        assert_eq!(row.joined_at, original_joined_at);
    }

    #[tokio::test]
    async fn record_ping_is_monotonic() {
        let store = InMemoryStore::new();
        let room = store
            .insert_room(test_room("ABC234", Uuid::new_v4()))
            .await
            .unwrap();
        let member = test_member(room.id, "Dana", MemberRole::Host);
        let user_id = member.user_id;
        store.upsert_member(member).await.unwrap();

        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(60);

        store.record_member_ping(&room.id, &user_id, now).await.unwrap();
        store
            .record_member_ping(&room.id, &user_id, earlier)
            .await
            .unwrap();

        let row = store.get_member(&room.id, &user_id).await.unwrap().unwrap();
        assert_eq!(row.last_ping, now, "older ping must not rewind last_ping");
    }

    #[tokio::test]
    async fn stale_sweep_flips_only_silent_members() {
        let store = InMemoryStore::new();
        let host = test_member(Uuid::new_v4(), "Host", MemberRole::Host);
        let room = store
            .insert_room(test_room("ABC234", host.user_id))
            .await
            .unwrap();

        let mut stale = test_member(room.id, "Stale", MemberRole::Player);
        stale.room_id = room.id;
        stale.last_ping = Utc::now() - chrono::Duration::minutes(10);
        let stale_id = stale.user_id;

        let mut fresh = test_member(room.id, "Fresh", MemberRole::Player);
        fresh.room_id = room.id;
        let fresh_id = fresh.user_id;

        store.upsert_member(stale).await.unwrap();
        store.upsert_member(fresh).await.unwrap();
        // upsert_member stamps last_ping; rewind the stale row directly.
        {
            let mut members = store.members.write().await;
            members
                .get_mut(&room.id)
                .unwrap()
                .get_mut(&stale_id)
                .unwrap()
                .last_ping = Utc::now() - chrono::Duration::minutes(10);
        }

        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        let flipped = store.sweep_stale_members(cutoff).await.unwrap();

        assert_eq!(flipped.len(), 1);
        assert_eq!(flipped[0].user_id, stale_id);
        assert_eq!(flipped[0].room_code, "ABC234");

        let stale_row = store.get_member(&room.id, &stale_id).await.unwrap().unwrap();
        assert!(!stale_row.is_connected);
        assert_eq!(stale_row.current_location, MemberLocation::Disconnected);

        let fresh_row = store.get_member(&room.id, &fresh_id).await.unwrap().unwrap();
        assert!(fresh_row.is_connected);
    }

    #[tokio::test]
    async fn promote_earliest_connected_picks_by_join_order() {
        let store = InMemoryStore::new();
        let host = test_member(Uuid::new_v4(), "Host", MemberRole::Host);
        let room = store
            .insert_room(test_room("ABC234", host.user_id))
            .await
            .unwrap();

        let mut host = host;
        host.room_id = room.id;
        let host_id = host.user_id;

        let mut second = test_member(room.id, "Second", MemberRole::Player);
        second.joined_at = host.joined_at + chrono::Duration::seconds(1);
        let second_id = second.user_id;

        let mut third = test_member(room.id, "Third", MemberRole::Player);
        third.joined_at = host.joined_at + chrono::Duration::seconds(2);

        store.upsert_member(host).await.unwrap();
        store.upsert_member(second).await.unwrap();
        store.upsert_member(third).await.unwrap();

        store
            .set_member_location(&room.id, &host_id, MemberLocation::Disconnected)
            .await
            .unwrap();

        let promoted = store.promote_earliest_connected(&room.id).await.unwrap();
        assert_eq!(promoted, Some((host_id, second_id)));

        let updated = store.get_room(&room.id).await.unwrap().unwrap();
        assert_eq!(updated.host_id, second_id);
        let new_host = store
            .get_member(&room.id, &second_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new_host.role, MemberRole::Host);
    }

    #[tokio::test]
    async fn promotion_is_void_when_host_reconnected() {
        let store = InMemoryStore::new();
        let host = test_member(Uuid::new_v4(), "Host", MemberRole::Host);
        let room = store
            .insert_room(test_room("ABC234", host.user_id))
            .await
            .unwrap();
        let mut host = host;
        host.room_id = room.id;
        store.upsert_member(host).await.unwrap();

        let mut other = test_member(room.id, "Other", MemberRole::Player);
        other.joined_at = Utc::now() + chrono::Duration::seconds(1);
        store.upsert_member(other).await.unwrap();

        // Host is still connected: no transfer.
        assert_eq!(store.promote_earliest_connected(&room.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn abandon_sweep_protects_rooms_with_members_in_game() {
        let store = InMemoryStore::new();
        let host = test_member(Uuid::new_v4(), "Host", MemberRole::Host);
        let room = store
            .insert_room(test_room("ABC234", host.user_id))
            .await
            .unwrap();
        let mut host = host;
        host.room_id = room.id;
        let host_id = host.user_id;
        store.upsert_member(host).await.unwrap();
        store
            .set_member_location(&room.id, &host_id, MemberLocation::Game)
            .await
            .unwrap();

        // Both cutoffs in the future: everything qualifies except protected rooms.
        let future = Utc::now() + chrono::Duration::hours(1);
        let outcome = store.sweep_abandonable_rooms(future, future).await.unwrap();
        assert!(outcome.abandoned.is_empty());

        // Once the member leaves the game and disconnects, the room is fair game.
        store
            .set_member_location(&room.id, &host_id, MemberLocation::Disconnected)
            .await
            .unwrap();
        let outcome = store.sweep_abandonable_rooms(future, future).await.unwrap();
        assert_eq!(outcome.abandoned.len(), 1);
        assert_eq!(outcome.abandoned[0].id, room.id);

        let updated = store.get_room(&room.id).await.unwrap().unwrap();
        assert_eq!(updated.status, RoomStatus::Abandoned);
    }

    #[tokio::test]
    async fn purge_deletes_only_aged_abandoned_rooms_and_cascades() {
        let store = InMemoryStore::new();
        let host_id = Uuid::new_v4();
        let room = store.insert_room(test_room("ABC234", host_id)).await.unwrap();
        let mut member = test_member(room.id, "Host", MemberRole::Host);
        member.room_id = room.id;
        store.upsert_member(member).await.unwrap();
        store
            .append_event(RoomEvent::new(
                room.id,
                None,
                "room_created",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        store
            .insert_session(SessionRecord {
                token_hash: "deadbeef".to_string(),
                room_code: "ABC234".to_string(),
                user_id: host_id,
                game_type: "ddf".to_string(),
                streamer_mode: false,
                metadata: crate::session::SessionMetadata {
                    display_name: "Host".to_string(),
                    is_host: true,
                    player_count: 1,
                    premium_tier: crate::protocol::PremiumTier::Free,
                },
                created_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::hours(3),
                last_accessed: Utc::now(),
            })
            .await
            .unwrap();

        store
            .set_room_status(&room.id, RoomStatus::Abandoned)
            .await
            .unwrap();

        // Not yet past the grace period: nothing purged.
        let purged = store
            .purge_abandoned_rooms(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(purged.is_empty());

        // Grace elapsed: the room and all owned rows disappear.
        let purged = store
            .purge_abandoned_rooms(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(purged, vec![(room.id, "ABC234".to_string())]);
        assert!(store.get_room(&room.id).await.unwrap().is_none());
        assert!(store.get_room_by_code("ABC234").await.unwrap().is_none());
        assert!(store.list_members(&room.id).await.unwrap().is_empty());
        assert!(store.events_for_room(&room.id).await.unwrap().is_empty());
        assert!(store
            .resolve_session("deadbeef", Utc::now())
            .await
            .unwrap()
            .is_none());

        // The code is free for reuse.
        assert!(store.insert_room(test_room("ABC234", Uuid::new_v4())).await.is_ok());
    }

    #[tokio::test]
    async fn pending_return_set_is_idempotent() {
        let store = InMemoryStore::new();
        let room = store
            .insert_room(test_room("ABC234", Uuid::new_v4()))
            .await
            .unwrap();

        let now = Utc::now();
        let until = now + chrono::Duration::seconds(30);
        assert!(store.set_pending_return(&room.id, now, until).await.unwrap());
        // Second arm while pending: no-op.
        assert!(!store.set_pending_return(&room.id, now, until).await.unwrap());

        let updated = store.get_room(&room.id).await.unwrap().unwrap();
        assert!(updated.metadata.pending_return);
        assert_eq!(updated.status, RoomStatus::Returning);
        assert_eq!(updated.metadata.return_initiated_at, Some(now));

        assert!(store.clear_pending_return(&room.id).await.unwrap());
        assert!(!store.clear_pending_return(&room.id).await.unwrap());
        let cleared = store.get_room(&room.id).await.unwrap().unwrap();
        assert!(!cleared.metadata.pending_return);
        assert_eq!(cleared.status, RoomStatus::Lobby);
        // Grace window survives the clear.
        assert_eq!(cleared.metadata.return_in_progress_until, Some(until));
    }

    #[tokio::test]
    async fn mark_game_started_resets_return_cycle() {
        let store = InMemoryStore::new();
        let room = store
            .insert_room(test_room("ABC234", Uuid::new_v4()))
            .await
            .unwrap();
        let now = Utc::now();
        store
            .set_pending_return(&room.id, now, now + chrono::Duration::seconds(30))
            .await
            .unwrap();

        assert!(store.mark_game_started(&room.id, now).await.unwrap());
        let updated = store.get_room(&room.id).await.unwrap().unwrap();
        assert_eq!(updated.status, RoomStatus::InGame);
        assert_eq!(updated.game_started_at, Some(now));
        assert!(!updated.metadata.pending_return);
        assert!(updated.metadata.return_in_progress_until.is_none());
    }

    #[tokio::test]
    async fn events_are_capped_per_room() {
        let store = InMemoryStore::new();
        let room = store
            .insert_room(test_room("ABC234", Uuid::new_v4()))
            .await
            .unwrap();

        for i in 0..(MAX_EVENTS_PER_ROOM + 10) {
            store
                .append_event(RoomEvent::new(
                    room.id,
                    None,
                    "tick",
                    serde_json::json!({ "i": i }),
                ))
                .await
                .unwrap();
        }

        let events = store.events_for_room(&room.id).await.unwrap();
        assert_eq!(events.len(), MAX_EVENTS_PER_ROOM);
        // Oldest entries were dropped.
        assert_eq!(events[0].payload["i"], 10);
    }

    #[tokio::test]
    async fn concurrent_room_inserts_have_unique_ids() {
        let store = Arc::new(InMemoryStore::new());
        let task_count = 50;
        let barrier = Arc::new(tokio::sync::Barrier::new(task_count));

        let mut handles = Vec::with_capacity(task_count);
        for i in 0..task_count {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let code = format!("R{i:05}");
                store.insert_room(test_room(&code, Uuid::new_v4())).await
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            let room = handle
                .await
                .expect("task should not panic")
                .expect("insert should succeed");
            ids.insert(room.id);
        }
        assert_eq!(ids.len(), task_count);
    }
}
