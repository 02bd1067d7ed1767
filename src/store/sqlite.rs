use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{JoinOutcome, RemoveOutcome, RoomStore, StoreKind};
use crate::error::StoreError;
use crate::model::{Participant, Room};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_IDLE_CONNECTIONS: usize = 8;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rooms (
    room_id          TEXT PRIMARY KEY NOT NULL,
    created_by       TEXT NOT NULL,
    participants     TEXT NOT NULL DEFAULT '[]',
    is_active        INTEGER NOT NULL DEFAULT 1,
    max_participants INTEGER NOT NULL,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS rooms_updated_at_idx ON rooms (updated_at);
";

const SELECT_ROOM: &str = "SELECT room_id, created_by, participants, is_active, max_participants, created_at, updated_at FROM rooms";

/// SQLite-backed room store.
///
/// Every call runs on the blocking pool with a connection checked out of a small
/// idle list, so no in-process lock is held while SQLite does I/O. Participant
/// mutations run inside `BEGIN IMMEDIATE` transactions, which makes each
/// read-check-write on a room atomic with respect to every other writer.
pub struct SqliteStore {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: path.to_path_buf(),
            idle: Mutex::new(vec![conn]),
        })
    }

    fn checkout(&self) -> Result<Connection, StoreError> {
        let pooled = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => open_connection(&self.path),
        }
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let mut conn = self.checkout()?;
        let (conn, res) = tokio::task::spawn_blocking(move || {
            let res = f(&mut conn);
            (conn, res)
        })
        .await?;
        self.checkin(conn);
        res
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    Ok(conn)
}

struct RoomRow {
    room_id: String,
    created_by: String,
    participants: String,
    is_active: bool,
    max_participants: i64,
    created_at: i64,
    updated_at: i64,
}

impl RoomRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            room_id: row.get(0)?,
            created_by: row.get(1)?,
            participants: row.get(2)?,
            is_active: row.get(3)?,
            max_participants: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_room(self) -> Result<Room, StoreError> {
        let participants: Vec<Participant> = serde_json::from_str(&self.participants)
            .map_err(|e| StoreError::Corrupt(format!("{}: participants: {e}", self.room_id)))?;
        Ok(Room {
            created_at: from_millis(&self.room_id, self.created_at)?,
            updated_at: from_millis(&self.room_id, self.updated_at)?,
            max_participants: usize::try_from(self.max_participants).map_err(|_| {
                StoreError::Corrupt(format!("{}: max_participants", self.room_id))
            })?,
            room_id: self.room_id,
            created_by: self.created_by,
            participants,
            is_active: self.is_active,
        })
    }
}

fn from_millis(room_id: &str, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("{room_id}: timestamp {ms}")))
}

fn encode_participants(participants: &[Participant]) -> Result<String, StoreError> {
    serde_json::to_string(participants).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn select_room(conn: &Connection, room_id: &str) -> Result<Option<Room>, StoreError> {
    let row = conn
        .query_row(
            &format!("{SELECT_ROOM} WHERE room_id = ?1"),
            params![room_id],
            RoomRow::from_row,
        )
        .optional()?;
    row.map(RoomRow::into_room).transpose()
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl RoomStore for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    async fn insert(&self, room: Room) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let participants = encode_participants(&room.participants)?;
            let res = conn.execute(
                "INSERT INTO rooms (room_id, created_by, participants, is_active, max_participants, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    room.room_id,
                    room.created_by,
                    participants,
                    room.is_active,
                    room.max_participants as i64,
                    room.created_at.timestamp_millis(),
                    room.updated_at.timestamp_millis(),
                ],
            );
            match res {
                Ok(_) => Ok(()),
                Err(err) if is_constraint_violation(&err) => {
                    Err(StoreError::DuplicateId(room.room_id))
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    async fn find_active(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            Ok(select_room(conn, &room_id)?.filter(|room| room.is_active))
        })
        .await
    }

    async fn append_participant(
        &self,
        room_id: &str,
        participant: Participant,
    ) -> Result<JoinOutcome, StoreError> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut room) = select_room(&tx, &room_id)?.filter(|r| r.is_active) else {
                return Ok(JoinOutcome::NotFound);
            };
            if !room.can_join() {
                return Ok(JoinOutcome::Full);
            }
            room.participants.push(participant);
            room.updated_at = Utc::now();
            tx.execute(
                "UPDATE rooms SET participants = ?1, updated_at = ?2 WHERE room_id = ?3",
                params![
                    encode_participants(&room.participants)?,
                    room.updated_at.timestamp_millis(),
                    room.room_id,
                ],
            )?;
            tx.commit()?;
            Ok(JoinOutcome::Joined(room))
        })
        .await
    }

    async fn remove_participant(
        &self,
        room_id: &str,
        address: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        let room_id = room_id.to_string();
        let address = address.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut room) = select_room(&tx, &room_id)? else {
                return Ok(RemoveOutcome::NotFound);
            };
            let before = room.participants.len();
            room.participants
                .retain(|p| p.connection_address != address);
            if room.participants.len() == before {
                return Ok(RemoveOutcome::Remaining(room));
            }
            if room.participants.is_empty() {
                tx.execute("DELETE FROM rooms WHERE room_id = ?1", params![room_id])?;
                tx.commit()?;
                return Ok(RemoveOutcome::Deleted);
            }
            room.updated_at = Utc::now();
            tx.execute(
                "UPDATE rooms SET participants = ?1, updated_at = ?2 WHERE room_id = ?3",
                params![
                    encode_participants(&room.participants)?,
                    room.updated_at.timestamp_millis(),
                    room.room_id,
                ],
            )?;
            tx.commit()?;
            Ok(RemoveOutcome::Remaining(room))
        })
        .await
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<Room>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_ROOM} WHERE is_active = 1 ORDER BY created_at DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![limit as i64], RoomRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(RoomRow::into_room).collect()
        })
        .await
    }

    async fn delete_idle(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM rooms WHERE updated_at < ?1",
                params![cutoff.timestamp_millis()],
            )?;
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn temp_store(name: &str) -> SqliteStore {
        let dir = std::env::temp_dir().join(format!("roomsignal-sqlite-{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        SqliteStore::open(&dir.join("rooms.db")).unwrap()
    }

    fn room(id: &str, max: usize) -> Room {
        Room::new(id.to_string(), "alice".to_string(), max)
    }

    #[tokio::test]
    async fn room_round_trips_through_database() {
        let store = temp_store("roundtrip");
        store.insert(room("AAAA1111", 2)).await.unwrap();
        store
            .append_participant("AAAA1111", Participant::new("a", "alice"))
            .await
            .unwrap();

        let found = store.find_active("AAAA1111").await.unwrap().unwrap();
        assert_eq!(found.created_by, "alice");
        assert_eq!(found.max_participants, 2);
        assert_eq!(found.participants.len(), 1);
        assert_eq!(found.participants[0].user_id, "alice");
    }

    #[tokio::test]
    async fn duplicate_ids_are_reported() {
        let store = temp_store("duplicate");
        store.insert(room("AAAA1111", 2)).await.unwrap();
        let err = store.insert(room("AAAA1111", 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(_)));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = std::env::temp_dir().join("roomsignal-sqlite-reopen");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rooms.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(room("AAAA1111", 2)).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.find_active("AAAA1111").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn last_removal_deletes_the_record() {
        let store = temp_store("delete");
        store.insert(room("AAAA1111", 2)).await.unwrap();
        store
            .append_participant("AAAA1111", Participant::new("a", "alice"))
            .await
            .unwrap();
        store
            .append_participant("AAAA1111", Participant::new("b", "bob"))
            .await
            .unwrap();

        let outcome = store.remove_participant("AAAA1111", "b").await.unwrap();
        assert!(matches!(outcome, RemoveOutcome::Remaining(ref r) if r.participants.len() == 1));
        let outcome = store.remove_participant("AAAA1111", "a").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::Deleted);
        assert!(store.find_active("AAAA1111").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_never_exceed_capacity() {
        let store = Arc::new(temp_store("concurrent"));
        store.insert(room("AAAA1111", 2)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_participant("AAAA1111", Participant::new(format!("c{i}"), format!("u{i}")))
                    .await
                    .unwrap()
            }));
        }
        let mut joined = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), JoinOutcome::Joined(_)) {
                joined += 1;
            }
        }
        assert_eq!(joined, 2);
        let room = store.find_active("AAAA1111").await.unwrap().unwrap();
        assert_eq!(room.participants.len(), 2);
    }

    #[tokio::test]
    async fn idle_rooms_are_reaped() {
        let store = temp_store("idle");
        let mut stale = room("AAAA0001", 2);
        stale.updated_at = Utc::now() - ChronoDuration::hours(2);
        store.insert(stale).await.unwrap();
        store.insert(room("AAAA0002", 2)).await.unwrap();

        let reaped = store
            .delete_idle(Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(reaped, 1);
        let listed = store.list_active(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].room_id, "AAAA0002");
    }
}
