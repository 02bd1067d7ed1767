//! JSON events exchanged over a signaling connection.
//!
//! Every frame is `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Address, Participant};

/// Events a client may send.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(JoinRoomRequest),
    LeaveRoom,
    Signal(RelayRequest),
    Offer(RelayRequest),
    Answer(RelayRequest),
    IceCandidate(RelayRequest),
}

impl ClientEvent {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::LeaveRoom => "leave-room",
            ClientEvent::Signal(_) => RelayKind::Signal.as_str(),
            ClientEvent::Offer(_) => RelayKind::Offer.as_str(),
            ClientEvent::Answer(_) => RelayKind::Answer.as_str(),
            ClientEvent::IceCandidate(_) => RelayKind::IceCandidate.as_str(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A handshake message addressed to one peer. The payload is never inspected.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub target_address: Option<Address>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Signal,
    Offer,
    Answer,
    IceCandidate,
}

impl RelayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayKind::Signal => "signal",
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::IceCandidate => "ice-candidate",
        }
    }
}

/// Events the server sends.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected(Connected),
    RoomJoined(RoomJoined),
    UserJoined(PeerNotice),
    UserLeft(PeerNotice),
    LeftRoom(Notice),
    Signal(Relayed),
    Offer(Relayed),
    Answer(Relayed),
    IceCandidate(Relayed),
    Error(Notice),
}

impl ServerEvent {
    pub fn relayed(kind: RelayKind, relayed: Relayed) -> Self {
        match kind {
            RelayKind::Signal => ServerEvent::Signal(relayed),
            RelayKind::Offer => ServerEvent::Offer(relayed),
            RelayKind::Answer => ServerEvent::Answer(relayed),
            RelayKind::IceCandidate => ServerEvent::IceCandidate(relayed),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(Notice {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub address: Address,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room_id: String,
    pub participants: Vec<Participant>,
    pub message: String,
}

/// Arrival or departure of a room member.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerNotice {
    pub user_id: String,
    pub address: Address,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Notice {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Relayed {
    pub payload: Value,
    pub from_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_join_room() {
        let ev = ClientEvent::parse(r#"{"event":"join-room","data":{"roomId":"AB12CD34","userId":"alice"}}"#)
            .unwrap();
        assert_eq!(
            ev,
            ClientEvent::JoinRoom(JoinRoomRequest {
                room_id: Some("AB12CD34".into()),
                user_id: Some("alice".into()),
            })
        );
    }

    #[test]
    fn join_room_fields_are_optional() {
        let ev = ClientEvent::parse(r#"{"event":"join-room","data":{}}"#).unwrap();
        assert_eq!(ev, ClientEvent::JoinRoom(JoinRoomRequest::default()));
    }

    #[test]
    fn leave_room_needs_no_data() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"leave-room"}"#).unwrap(),
            ClientEvent::LeaveRoom
        );
    }

    #[test]
    fn parses_ice_candidate_with_opaque_payload() {
        let ev = ClientEvent::parse(
            r#"{"event":"ice-candidate","data":{"targetAddress":"b","payload":{"candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host"}}}"#,
        )
        .unwrap();
        let ClientEvent::IceCandidate(req) = ev else {
            panic!("expected ice-candidate");
        };
        assert_eq!(req.target_address.as_deref(), Some("b"));
        assert_eq!(
            req.payload.unwrap()["candidate"],
            "candidate:1 1 UDP 1 10.0.0.1 5000 typ host"
        );
    }

    #[test]
    fn unknown_events_are_rejected() {
        assert!(ClientEvent::parse(r#"{"event":"explode","data":{}}"#).is_err());
    }

    #[test]
    fn relayed_event_shape() {
        let ev = ServerEvent::relayed(
            RelayKind::Offer,
            Relayed {
                payload: json!({"sdp": "v=0"}),
                from_address: "a".into(),
                from_user_id: Some("alice".into()),
                kind: None,
            },
        );
        let value: Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "offer",
                "data": {"payload": {"sdp": "v=0"}, "fromAddress": "a", "fromUserId": "alice"}
            })
        );
    }
}
