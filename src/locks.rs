use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-room lock registry.
///
/// Every state transition for a room runs under that room's lock, so two
/// operations on the same room are serialized while operations on different
/// rooms proceed concurrently. Broadcast fan-out happens after the guard is
/// dropped so slow socket writes never extend the critical section.
#[derive(Default)]
pub struct RoomLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RoomLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for a room code, creating it on first use.
    pub async fn acquire(&self, room_code: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(room_code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for a room that no longer exists. Safe to call
    /// while a guard is held elsewhere: the Arc keeps the mutex alive until
    /// the guard drops, and a late `acquire` simply recreates the entry.
    pub fn forget(&self, room_code: &str) {
        self.locks.remove(room_code);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_room_operations_are_serialized() {
        let locks = Arc::new(RoomLocks::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let in_section = Arc::clone(&in_section);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("ABC234").await;
                let current = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_rooms_do_not_contend() {
        let locks = Arc::new(RoomLocks::new());
        let guard_a = locks.acquire("AAAAAA").await;

        // A second room's lock must be immediately available.
        let acquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire("BBBBBB"))
            .await
            .is_ok();
        assert!(acquired);
        drop(guard_a);
    }

    #[tokio::test]
    async fn forget_releases_registry_entry() {
        let locks = RoomLocks::new();
        drop(locks.acquire("AAAAAA").await);
        assert_eq!(locks.len(), 1);
        locks.forget("AAAAAA");
        assert_eq!(locks.len(), 0);
    }
}
