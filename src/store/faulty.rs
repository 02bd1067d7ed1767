//! In-memory store whose operations can be made to fail on demand.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::memory::MemoryStore;
use super::{JoinOutcome, RemoveOutcome, RoomStore, StoreKind};
use crate::error::StoreError;
use crate::model::{Participant, Room};

/// Each counter is the number of upcoming calls of that operation that fail
/// with [`StoreError::Unavailable`]. `usize::MAX` means "always".
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    pub insert_failures: AtomicUsize,
    pub find_failures: AtomicUsize,
    pub append_failures: AtomicUsize,
    pub remove_failures: AtomicUsize,
    pub list_failures: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn trip(counter: &AtomicUsize, op: &str) -> Result<(), StoreError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable(format!("{op}: disk I/O error at /var/lib/rooms.db")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RoomStore for FaultyStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    async fn insert(&self, room: Room) -> Result<(), StoreError> {
        Self::trip(&self.insert_failures, "insert")?;
        self.inner.insert(room).await
    }

    async fn find_active(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        Self::trip(&self.find_failures, "find")?;
        self.inner.find_active(room_id).await
    }

    async fn append_participant(
        &self,
        room_id: &str,
        participant: Participant,
    ) -> Result<JoinOutcome, StoreError> {
        Self::trip(&self.append_failures, "append")?;
        self.inner.append_participant(room_id, participant).await
    }

    async fn remove_participant(
        &self,
        room_id: &str,
        address: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        Self::trip(&self.remove_failures, "remove")?;
        self.inner.remove_participant(room_id, address).await
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<Room>, StoreError> {
        Self::trip(&self.list_failures, "list")?;
        self.inner.list_active(limit).await
    }

    async fn delete_idle(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.delete_idle(cutoff).await
    }
}
