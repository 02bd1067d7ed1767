use thiserror::Error;

/// Failures of a room store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("room id {0} already exists")]
    DuplicateId(String),
    #[error("corrupt room record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(format!("store task failed: {err}"))
    }
}

/// Errors produced by room operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("room not found")]
    NotFound,
    #[error("room is full")]
    Full,
    #[error("connection already in a room")]
    AlreadyJoined,
    #[error(transparent)]
    StorageUnavailable(#[from] StoreError),
}

impl RoomError {
    /// Text that may be shown to the remote party. Storage failures never leak
    /// their detail; `fallback` is used instead.
    pub fn client_message(&self, fallback: &str) -> String {
        match self {
            RoomError::InvalidRequest(msg) => msg.clone(),
            RoomError::NotFound => "Room not found".to_string(),
            RoomError::Full => "Room is full".to_string(),
            RoomError::AlreadyJoined => "Already in a room".to_string(),
            RoomError::StorageUnavailable(_) => fallback.to_string(),
        }
    }
}
