use rand::{rngs::OsRng, RngCore};
use regex::Regex;

const ROOM_ID_BYTES: usize = 4;

/// Fresh room id: 4 bytes from the OS CSPRNG rendered as 8 uppercase hex chars.
pub fn generate_room_id() -> String {
    let mut bytes = [0u8; ROOM_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Trim and uppercase a room id supplied by a client. Returns `None` when the
/// result cannot name a room.
pub fn normalize_room_id(raw: &str) -> Option<String> {
    static PATTERN: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"^[A-Z0-9]{4,16}$").unwrap());
    let id = raw.trim().to_uppercase();
    if PATTERN.is_match(&id) {
        Some(id)
    } else {
        None
    }
}

/// Address handed to a newly opened connection.
pub fn generate_address() -> String {
    uuid::Uuid::new_v4().as_simple().to_string()
}
