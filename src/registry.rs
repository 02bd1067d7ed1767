use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::{RoomError, StoreError};
use crate::ids::{generate_room_id, normalize_room_id};
use crate::model::{Participant, Room, RoomSummary};
use crate::shutdown::StopSignal;
use crate::store::{JoinOutcome, RemoveOutcome, RoomStore, StoreKind};

const CREATE_ATTEMPTS: usize = 8;

/// Policy constants for new rooms and idle reclamation.
#[derive(Debug, Clone, Copy)]
pub struct RoomPolicy {
    pub max_participants: usize,
    pub idle_timeout: Duration,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            max_participants: 2,
            idle_timeout: Duration::from_secs(3600),
        }
    }
}

/// Domain operations over the room store.
#[derive(Clone)]
pub struct RoomRegistry {
    store: Arc<dyn RoomStore>,
    policy: RoomPolicy,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn RoomStore>, policy: RoomPolicy) -> Self {
        Self { store, policy }
    }

    pub fn storage_kind(&self) -> StoreKind {
        self.store.kind()
    }

    pub fn policy(&self) -> RoomPolicy {
        self.policy
    }

    /// Create an empty active room and return its id.
    pub async fn create_room(&self, created_by: &str) -> Result<String, RoomError> {
        let created_by = created_by.trim();
        if created_by.is_empty() {
            return Err(RoomError::InvalidRequest("createdBy is required".to_string()));
        }
        for _ in 0..CREATE_ATTEMPTS {
            let room_id = generate_room_id();
            let room = Room::new(
                room_id.clone(),
                created_by.to_string(),
                self.policy.max_participants,
            );
            match self.store.insert(room).await {
                Ok(()) => {
                    crate::logging::info_kv(
                        "room created",
                        &[("room_id", &room_id), ("created_by", created_by)],
                    );
                    return Ok(room_id);
                }
                Err(StoreError::DuplicateId(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Unavailable("could not allocate a unique room id".to_string()).into())
    }

    pub async fn lookup_room(&self, room_id: &str) -> Result<Room, RoomError> {
        let room_id = normalize_room_id(room_id).ok_or(RoomError::NotFound)?;
        self.store
            .find_active(&room_id)
            .await?
            .ok_or(RoomError::NotFound)
    }

    /// Atomically add a participant if the room has space. Returns the room as it
    /// stands right after the append.
    pub async fn join_room(
        &self,
        room_id: &str,
        address: &str,
        user_id: &str,
    ) -> Result<Room, RoomError> {
        let room_id = normalize_room_id(room_id).ok_or(RoomError::NotFound)?;
        match self
            .store
            .append_participant(&room_id, Participant::new(address, user_id))
            .await?
        {
            JoinOutcome::Joined(room) => Ok(room),
            JoinOutcome::NotFound => Err(RoomError::NotFound),
            JoinOutcome::Full => Err(RoomError::Full),
        }
    }

    /// Remove a participant. Returns the room after removal, or `None` if the room
    /// no longer exists (deleted because it emptied, or already gone).
    pub async fn remove_participant(
        &self,
        room_id: &str,
        address: &str,
    ) -> Result<Option<Room>, RoomError> {
        match self.store.remove_participant(room_id, address).await? {
            RemoveOutcome::Remaining(room) => Ok(Some(room)),
            RemoveOutcome::Deleted => {
                crate::logging::info_kv("room deleted", &[("room_id", room_id)]);
                Ok(None)
            }
            RemoveOutcome::NotFound => Ok(None),
        }
    }

    pub async fn list_active_rooms(&self, limit: usize) -> Result<Vec<RoomSummary>, RoomError> {
        Ok(self
            .store
            .list_active(limit)
            .await?
            .iter()
            .map(Room::summary)
            .collect())
    }

    /// Delete rooms idle for longer than the policy window.
    pub async fn reap_idle(&self) -> Result<usize, RoomError> {
        let window = chrono::Duration::from_std(self.policy.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let reaped = self.store.delete_idle(Utc::now() - window).await?;
        if reaped > 0 {
            crate::logging::info_kv("idle rooms reaped", &[("count", &reaped.to_string())]);
        }
        Ok(reaped)
    }

    /// Run [`reap_idle`](Self::reap_idle) every `every` until `stop` fires.
    pub fn spawn_reaper(&self, every: Duration, stop: StopSignal) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let stopped = stop.wait();
            tokio::pin!(stopped);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = registry.reap_idle().await {
                            crate::logging::error_kv("idle reaper failed", &[("error", &err.to_string())]);
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
            crate::logging::info("idle reaper stopped");
        })
    }

    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::collections::HashSet;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(MemoryStore::new()), RoomPolicy::default())
    }

    #[tokio::test]
    async fn create_requires_creator() {
        let err = registry().create_room("   ").await.unwrap_err();
        assert!(matches!(err, RoomError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn created_ids_are_unique() {
        let reg = registry();
        let mut ids = HashSet::new();
        for _ in 0..200 {
            assert!(ids.insert(reg.create_room("alice").await.unwrap()));
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let reg = registry();
        let id = reg.create_room("alice").await.unwrap();
        let room = reg.lookup_room(&id.to_lowercase()).await.unwrap();
        assert_eq!(room.room_id, id);
        assert_eq!(room.max_participants, 2);
        assert!(room.participants.is_empty());
    }

    #[tokio::test]
    async fn lookup_unknown_is_not_found() {
        let err = registry().lookup_room("FFFFFFFF").await.unwrap_err();
        assert!(matches!(err, RoomError::NotFound));
        let err = registry().lookup_room("not a room").await.unwrap_err();
        assert!(matches!(err, RoomError::NotFound));
    }

    #[tokio::test]
    async fn alice_bob_scenario() {
        let reg = registry();
        let id = reg.create_room("alice").await.unwrap();

        let room = reg.join_room(&id, "conn-a", "alice").await.unwrap();
        assert_eq!(room.participant_count(), 1);
        assert!(room.view().can_join);

        let room = reg.join_room(&id, "conn-b", "bob").await.unwrap();
        assert_eq!(room.participant_count(), 2);
        assert!(!room.view().can_join);

        let err = reg.join_room(&id, "conn-c", "carol").await.unwrap_err();
        assert!(matches!(err, RoomError::Full));

        let room = reg.remove_participant(&id, "conn-b").await.unwrap().unwrap();
        assert_eq!(room.participant_count(), 1);

        assert!(reg.remove_participant(&id, "conn-a").await.unwrap().is_none());
        assert!(matches!(reg.lookup_room(&id).await, Err(RoomError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_stay_within_capacity() {
        let reg = RoomRegistry::new(
            Arc::new(MemoryStore::new()),
            RoomPolicy {
                max_participants: 3,
                ..RoomPolicy::default()
            },
        );
        let id = reg.create_room("alice").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..32 {
            let reg = reg.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                reg.join_room(&id, &format!("conn-{i}"), &format!("user-{i}"))
                    .await
                    .is_ok()
            }));
        }
        let mut joined = 0;
        for h in handles {
            if h.await.unwrap() {
                joined += 1;
            }
        }
        assert_eq!(joined, 3);
        assert_eq!(reg.lookup_room(&id).await.unwrap().participant_count(), 3);
    }

    #[tokio::test]
    async fn list_returns_summaries() {
        let reg = registry();
        let a = reg.create_room("alice").await.unwrap();
        reg.join_room(&a, "conn-a", "alice").await.unwrap();
        let listed = reg.list_active_rooms(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].room_id, a);
        assert_eq!(listed[0].participant_count, 1);
    }

    #[tokio::test]
    async fn reaper_respects_idle_window() {
        let reg = RoomRegistry::new(
            Arc::new(MemoryStore::new()),
            RoomPolicy {
                idle_timeout: Duration::ZERO,
                ..RoomPolicy::default()
            },
        );
        let id = reg.create_room("alice").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(reg.reap_idle().await.unwrap(), 1);
        assert!(matches!(reg.lookup_room(&id).await, Err(RoomError::NotFound)));

        let fresh = registry();
        fresh.create_room("bob").await.unwrap();
        assert_eq!(fresh.reap_idle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_reaper_runs_until_stopped() {
        let reg = RoomRegistry::new(
            Arc::new(MemoryStore::new()),
            RoomPolicy {
                idle_timeout: Duration::ZERO,
                ..RoomPolicy::default()
            },
        );
        let id = reg.create_room("alice").await.unwrap();
        let stop = StopSignal::new();
        let handle = reg.spawn_reaper(Duration::from_millis(10), stop.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(reg.lookup_room(&id).await, Err(RoomError::NotFound)));

        stop.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
