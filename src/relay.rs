use std::sync::Arc;

use serde_json::Value;

use crate::hub::Hub;
use crate::protocol::{RelayKind, RelayRequest, Relayed, ServerEvent};
use crate::sessions::SessionTracker;
use crate::telemetry::RelayStats;

/// Forwards handshake messages to the single connection they name.
///
/// Nothing is validated, buffered, or persisted. A message whose target is not
/// a live connection other than the sender, or whose target's outbound buffer
/// is full, is dropped without telling anyone.
#[derive(Clone)]
pub struct SignalRelay {
    hub: Arc<Hub>,
    sessions: Arc<SessionTracker>,
    stats: Arc<RelayStats>,
}

impl SignalRelay {
    pub fn new(hub: Arc<Hub>, sessions: Arc<SessionTracker>, stats: Arc<RelayStats>) -> Self {
        Self {
            hub,
            sessions,
            stats,
        }
    }

    /// Returns whether the message was delivered.
    pub fn forward(&self, from: &str, kind: RelayKind, req: RelayRequest) -> bool {
        let Some(target) = req.target_address.filter(|t| !t.is_empty()) else {
            return self.drop_message(from, kind, "missing target");
        };
        if target == from {
            return self.drop_message(from, kind, "target is sender");
        }
        // Offers, answers and candidates pass through untouched, null included
        // (a null candidate marks end-of-candidates). Only `signal` needs a payload.
        let payload = match (kind, req.payload) {
            (RelayKind::Signal, None | Some(Value::Null)) => {
                return self.drop_message(from, kind, "missing payload");
            }
            (_, payload) => payload.unwrap_or(Value::Null),
        };

        let event = ServerEvent::relayed(
            kind,
            Relayed {
                payload,
                from_address: from.to_string(),
                from_user_id: self.sessions.lookup(from).map(|b| b.user_id),
                kind: req.kind,
            },
        );
        if self.hub.send(&target, event) {
            self.stats.on_relayed();
            true
        } else {
            self.drop_message(from, kind, "target not connected")
        }
    }

    fn drop_message(&self, from: &str, kind: RelayKind, reason: &str) -> bool {
        self.stats.on_dropped();
        crate::logging::info_kv(
            "signal dropped",
            &[("event", kind.as_str()), ("from", from), ("reason", reason)],
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::hub::{outbound_channel, OUTBOUND_CAPACITY};

    struct Fixture {
        relay: SignalRelay,
        hub: Arc<Hub>,
        sessions: Arc<SessionTracker>,
        stats: Arc<RelayStats>,
    }

    fn fixture() -> Fixture {
        let hub = Arc::new(Hub::new());
        let sessions = Arc::new(SessionTracker::new());
        let stats = Arc::new(RelayStats::default());
        Fixture {
            relay: SignalRelay::new(hub.clone(), sessions.clone(), stats.clone()),
            hub,
            sessions,
            stats,
        }
    }

    fn request(target: &str, payload: serde_json::Value) -> RelayRequest {
        RelayRequest {
            target_address: Some(target.to_string()),
            payload: Some(payload),
            kind: None,
        }
    }

    #[test]
    fn delivers_to_target_only_with_sender_identity() {
        let f = fixture();
        let (tx_a, mut rx_a) = outbound_channel();
        let (tx_b, mut rx_b) = outbound_channel();
        let (tx_c, mut rx_c) = outbound_channel();
        f.hub.register("a", tx_a);
        f.hub.register("b", tx_b);
        f.hub.register("c", tx_c);
        f.sessions.open("a");
        f.sessions.bind("a", "ROOM0001", "alice");

        assert!(f.relay.forward("a", RelayKind::Offer, request("b", json!({"sdp": "v=0"}))));

        let ServerEvent::Offer(msg) = rx_b.try_recv().unwrap() else {
            panic!("expected offer");
        };
        assert_eq!(msg.payload, json!({"sdp": "v=0"}));
        assert_eq!(msg.from_address, "a");
        assert_eq!(msg.from_user_id.as_deref(), Some("alice"));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
        assert_eq!(f.stats.snapshot().relayed_total, 1);
    }

    #[test]
    fn signal_type_is_passed_through() {
        let f = fixture();
        let (tx_b, mut rx_b) = outbound_channel();
        f.hub.register("b", tx_b);
        let mut req = request("b", json!("opaque"));
        req.kind = Some("renegotiate".into());
        assert!(f.relay.forward("a", RelayKind::Signal, req));
        let ServerEvent::Signal(msg) = rx_b.try_recv().unwrap() else {
            panic!("expected signal");
        };
        assert_eq!(msg.kind.as_deref(), Some("renegotiate"));
        assert_eq!(msg.from_user_id, None);
    }

    #[test]
    fn unknown_target_is_silently_dropped() {
        let f = fixture();
        let (tx_a, mut rx_a) = outbound_channel();
        f.hub.register("a", tx_a);
        assert!(!f.relay.forward("a", RelayKind::Answer, request("ghost", json!({}))));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(f.stats.snapshot().dropped_total, 1);
    }

    #[test]
    fn never_echoes_to_sender() {
        let f = fixture();
        let (tx_a, mut rx_a) = outbound_channel();
        f.hub.register("a", tx_a);
        assert!(!f.relay.forward("a", RelayKind::Signal, request("a", json!(1))));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn missing_target_or_payload_is_dropped() {
        let f = fixture();
        let (tx_b, mut rx_b) = outbound_channel();
        f.hub.register("b", tx_b);
        assert!(!f.relay.forward("a", RelayKind::Signal, RelayRequest::default()));
        let no_payload = RelayRequest {
            target_address: Some("b".into()),
            ..RelayRequest::default()
        };
        assert!(!f.relay.forward("a", RelayKind::Signal, no_payload));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn null_payload_is_forwarded_for_handshake_kinds() {
        let f = fixture();
        let (tx_b, mut rx_b) = outbound_channel();
        f.hub.register("b", tx_b);
        for kind in [RelayKind::Offer, RelayKind::Answer, RelayKind::IceCandidate] {
            let req = RelayRequest {
                target_address: Some("b".into()),
                payload: Some(Value::Null),
                kind: None,
            };
            assert!(f.relay.forward("a", kind, req));
        }
        let ServerEvent::Offer(msg) = rx_b.try_recv().unwrap() else {
            panic!("expected offer");
        };
        assert_eq!(msg.payload, Value::Null);
        assert!(matches!(rx_b.try_recv().unwrap(), ServerEvent::Answer(_)));
        let ServerEvent::IceCandidate(msg) = rx_b.try_recv().unwrap() else {
            panic!("expected ice-candidate");
        };
        assert_eq!(msg.payload, Value::Null);

        let omitted = RelayRequest {
            target_address: Some("b".into()),
            ..RelayRequest::default()
        };
        assert!(f.relay.forward("a", RelayKind::IceCandidate, omitted));
        assert_eq!(f.stats.snapshot().dropped_total, 0);
    }

    #[test]
    fn null_signal_payload_is_dropped() {
        let f = fixture();
        let (tx_b, mut rx_b) = outbound_channel();
        f.hub.register("b", tx_b);
        assert!(!f.relay.forward("a", RelayKind::Signal, request("b", Value::Null)));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn stalled_target_counts_as_dropped() {
        let f = fixture();
        let (tx_b, _rx_b) = outbound_channel();
        f.hub.register("b", tx_b);
        let total = OUTBOUND_CAPACITY + 10;
        let delivered = (0..total)
            .filter(|i| f.relay.forward("a", RelayKind::Signal, request("b", json!(i))))
            .count();
        assert_eq!(delivered, OUTBOUND_CAPACITY);
        let snap = f.stats.snapshot();
        assert_eq!(snap.relayed_total, OUTBOUND_CAPACITY as u64);
        assert_eq!(snap.dropped_total, 10);
    }
}
