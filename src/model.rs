use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Address of one live signaling connection.
pub type Address = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub connection_address: Address,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(connection_address: impl Into<Address>, user_id: impl Into<String>) -> Self {
        Self {
            connection_address: connection_address.into(),
            user_id: user_id.into(),
            joined_at: Utc::now(),
        }
    }
}

/// A capacity-bounded group of participants. Participants are kept in join order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    pub created_by: String,
    pub participants: Vec<Participant>,
    pub is_active: bool,
    pub max_participants: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn new(room_id: String, created_by: String, max_participants: usize) -> Self {
        let now = Utc::now();
        Self {
            room_id,
            created_by,
            participants: Vec::new(),
            is_active: true,
            max_participants,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn can_join(&self) -> bool {
        self.participants.len() < self.max_participants
    }

    pub fn contains(&self, address: &str) -> bool {
        self.participants
            .iter()
            .any(|p| p.connection_address == address)
    }

    /// Everyone except `address`, in join order.
    pub fn others(&self, address: &str) -> Vec<Participant> {
        self.participants
            .iter()
            .filter(|p| p.connection_address != address)
            .cloned()
            .collect()
    }

    pub fn view(&self) -> RoomView {
        RoomView {
            room_id: self.room_id.clone(),
            participant_count: self.participant_count(),
            max_participants: self.max_participants,
            can_join: self.can_join(),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id.clone(),
            participant_count: self.participant_count(),
            created_at: self.created_at,
        }
    }
}

/// What the get-room endpoint exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: String,
    pub participant_count: usize,
    pub max_participants: usize,
    pub can_join: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub participant_count: usize,
    pub created_at: DateTime<Utc>,
}
