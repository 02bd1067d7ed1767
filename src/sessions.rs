use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::Address;

/// Room binding of a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Default)]
struct Session {
    binding: Option<Binding>,
}

/// Which room and user each open connection is bound to.
///
/// Process-local; an entry exists from connection open until close. Each entry
/// is only ever mutated on behalf of its own connection.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: RwLock<HashMap<Address, Session>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened, unjoined connection.
    pub fn open(&self, address: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string(), Session::default());
    }

    /// Drop the entry for a closed connection, returning its binding if it had one.
    pub fn close(&self, address: &str) -> Option<Binding> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address)
            .and_then(|s| s.binding)
    }

    pub fn bind(&self, address: &str, room_id: &str, user_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.entry(address.to_string()).or_default().binding = Some(Binding {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        });
    }

    pub fn unbind(&self, address: &str) -> Option<Binding> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(address)
            .and_then(|s| s.binding.take())
    }

    pub fn lookup(&self, address: &str) -> Option<Binding> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .and_then(|s| s.binding.clone())
    }

    pub fn is_open(&self, address: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
