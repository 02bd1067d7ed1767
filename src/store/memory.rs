use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{JoinOutcome, RemoveOutcome, RoomStore, StoreKind};
use crate::error::StoreError;
use crate::model::{Participant, Room};

/// In-process room map.
///
/// Each room sits behind its own mutex so mutations on one room never wait on
/// another. The outer map lock is only held to look up or unlink a slot.
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
}

struct Slot {
    room: Room,
    // Set once the room is unlinked; a caller that fetched the slot earlier must
    // treat it as gone.
    deleted: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, room_id: &str) -> Option<Arc<Mutex<Slot>>> {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .cloned()
    }

    fn unlink(&self, room_id: &str, slot: &Arc<Mutex<Slot>>) {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        if rooms.get(room_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            rooms.remove(room_id);
        }
    }

    fn snapshot(&self) -> Vec<Arc<Mutex<Slot>>> {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    async fn insert(&self, room: Room) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        if rooms.contains_key(&room.room_id) {
            return Err(StoreError::DuplicateId(room.room_id));
        }
        rooms.insert(
            room.room_id.clone(),
            Arc::new(Mutex::new(Slot {
                room,
                deleted: false,
            })),
        );
        Ok(())
    }

    async fn find_active(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let Some(slot) = self.slot(room_id) else {
            return Ok(None);
        };
        let slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.deleted || !slot.room.is_active {
            return Ok(None);
        }
        Ok(Some(slot.room.clone()))
    }

    async fn append_participant(
        &self,
        room_id: &str,
        participant: Participant,
    ) -> Result<JoinOutcome, StoreError> {
        let Some(slot) = self.slot(room_id) else {
            return Ok(JoinOutcome::NotFound);
        };
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.deleted || !slot.room.is_active {
            return Ok(JoinOutcome::NotFound);
        }
        if !slot.room.can_join() {
            return Ok(JoinOutcome::Full);
        }
        slot.room.participants.push(participant);
        slot.room.updated_at = Utc::now();
        Ok(JoinOutcome::Joined(slot.room.clone()))
    }

    async fn remove_participant(
        &self,
        room_id: &str,
        address: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        let Some(handle) = self.slot(room_id) else {
            return Ok(RemoveOutcome::NotFound);
        };
        let mut slot = handle.lock().unwrap_or_else(|e| e.into_inner());
        if slot.deleted {
            return Ok(RemoveOutcome::NotFound);
        }
        let before = slot.room.participants.len();
        slot.room
            .participants
            .retain(|p| p.connection_address != address);
        if slot.room.participants.len() == before {
            return Ok(RemoveOutcome::Remaining(slot.room.clone()));
        }
        if slot.room.participants.is_empty() {
            slot.deleted = true;
            // Lock order is slot then map; nobody holds the map lock while waiting on a slot.
            self.unlink(room_id, &handle);
            return Ok(RemoveOutcome::Deleted);
        }
        slot.room.updated_at = Utc::now();
        Ok(RemoveOutcome::Remaining(slot.room.clone()))
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self
            .snapshot()
            .into_iter()
            .filter_map(|slot| {
                let slot = slot.lock().unwrap_or_else(|e| e.into_inner());
                (!slot.deleted && slot.room.is_active).then(|| slot.room.clone())
            })
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rooms.truncate(limit);
        Ok(rooms)
    }

    async fn delete_idle(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut reaped = 0;
        let entries: Vec<(String, Arc<Mutex<Slot>>)> = self
            .rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        for (room_id, handle) in entries {
            let mut slot = handle.lock().unwrap_or_else(|e| e.into_inner());
            if slot.deleted || slot.room.updated_at >= cutoff {
                continue;
            }
            slot.deleted = true;
            self.unlink(&room_id, &handle);
            reaped += 1;
        }
        Ok(reaped)
    }

    async fn shutdown(&self) {
        self.rooms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
