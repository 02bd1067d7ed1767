//! Room persistence.
//!
//! [`RoomStore`] is the only way upper layers touch room records. Two backends
//! implement it: [`sqlite::SqliteStore`] (durable) and [`memory::MemoryStore`]
//! (in-process, lost on restart). [`open_store`] picks one once at startup.
//!
//! Participant mutations are single atomic primitives (`append_participant`,
//! `remove_participant`) so concurrent joins/leaves on the same room are
//! linearizable and cannot exceed capacity or lose an update.

#[cfg(test)]
pub(crate) mod faulty;
pub mod memory;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{Participant, Room};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Sqlite => "sqlite",
            StoreKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Room),
    NotFound,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The room still exists; carries its post-removal state.
    Remaining(Room),
    /// The last participant left and the record was deleted.
    Deleted,
    NotFound,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Persist a new room. Fails with [`StoreError::DuplicateId`] if the id is taken.
    async fn insert(&self, room: Room) -> Result<(), StoreError>;

    /// Active room by id. Inactive records are reported as absent.
    async fn find_active(&self, room_id: &str) -> Result<Option<Room>, StoreError>;

    /// Append `participant` iff the room is active and below capacity.
    async fn append_participant(
        &self,
        room_id: &str,
        participant: Participant,
    ) -> Result<JoinOutcome, StoreError>;

    /// Remove the participant with `address`; deletes the room when that empties it.
    async fn remove_participant(
        &self,
        room_id: &str,
        address: &str,
    ) -> Result<RemoveOutcome, StoreError>;

    /// Active rooms, newest first.
    async fn list_active(&self, limit: usize) -> Result<Vec<Room>, StoreError>;

    /// Delete every room whose `updated_at` is older than `cutoff`. Returns the count.
    async fn delete_idle(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Release backend state at process shutdown.
    async fn shutdown(&self) {}
}

/// Select the room store for this process. A configured database that cannot be
/// opened degrades to the in-process store for the rest of the process lifetime.
pub fn open_store(database_path: Option<&Path>) -> Arc<dyn RoomStore> {
    let Some(path) = database_path else {
        crate::logging::info(
            "no database configured, running with in-memory storage - data will not persist between restarts",
        );
        return Arc::new(memory::MemoryStore::new());
    };

    match sqlite::SqliteStore::open(path) {
        Ok(store) => {
            crate::logging::info_kv(
                "durable room store connected",
                &[("path", &path.display().to_string())],
            );
            Arc::new(store)
        }
        Err(err) => {
            crate::logging::warn_kv(
                "durable room store unavailable, using in-memory storage - data will not persist between restarts",
                &[
                    ("path", &path.display().to_string()),
                    ("error", &err.to_string()),
                ],
            );
            Arc::new(memory::MemoryStore::new())
        }
    }
}
