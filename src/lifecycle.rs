//! Per-connection join / leave / disconnect handling.
//!
//! A connection is Unjoined until a successful `join-room`, then InRoom until it
//! leaves (back to Unjoined) or its transport closes (terminal). Events of one
//! connection are handled one at a time by its socket task; different
//! connections run concurrently against the shared registry.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::RoomError;
use crate::hub::Hub;
use crate::ids::generate_address;
use crate::model::{Address, Room};
use crate::protocol::{
    ClientEvent, Connected, JoinRoomRequest, Notice, PeerNotice, RelayKind, RoomJoined,
    ServerEvent,
};
use crate::registry::RoomRegistry;
use crate::relay::SignalRelay;
use crate::sessions::{Binding, SessionTracker};
use crate::telemetry::RelayStats;

pub struct Lifecycle {
    registry: RoomRegistry,
    sessions: Arc<SessionTracker>,
    hub: Arc<Hub>,
    relay: SignalRelay,
    stats: Arc<RelayStats>,
}

impl Lifecycle {
    pub fn new(registry: RoomRegistry) -> Self {
        let sessions = Arc::new(SessionTracker::new());
        let hub = Arc::new(Hub::new());
        let stats = Arc::new(RelayStats::default());
        let relay = SignalRelay::new(hub.clone(), sessions.clone(), stats.clone());
        Self {
            registry,
            sessions,
            hub,
            relay,
            stats,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn connection_count(&self) -> usize {
        self.hub.len()
    }

    /// Register a freshly opened connection and tell it its address.
    pub fn connect(&self, tx: mpsc::Sender<ServerEvent>) -> Address {
        let address = generate_address();
        self.hub.register(&address, tx);
        self.sessions.open(&address);
        self.stats.on_connect();
        crate::logging::info_kv("user connected", &[("address", &address)]);
        self.hub.send(
            &address,
            ServerEvent::Connected(Connected {
                address: address.clone(),
            }),
        );
        address
    }

    pub async fn handle(&self, address: &str, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom(req) => self.join(address, req).await,
            ClientEvent::LeaveRoom => self.leave(address).await,
            ClientEvent::Signal(req) => {
                self.relay.forward(address, RelayKind::Signal, req);
            }
            ClientEvent::Offer(req) => {
                self.relay.forward(address, RelayKind::Offer, req);
            }
            ClientEvent::Answer(req) => {
                self.relay.forward(address, RelayKind::Answer, req);
            }
            ClientEvent::IceCandidate(req) => {
                self.relay.forward(address, RelayKind::IceCandidate, req);
            }
        }
    }

    pub async fn join(&self, address: &str, req: JoinRoomRequest) {
        if let Err(err) = self.try_join(address, req).await {
            crate::logging::error_kv(
                "error joining room",
                &[("address", address), ("error", &err.to_string())],
            );
            self.stats.set_last_error(&err);
            self.hub.send(
                address,
                ServerEvent::error(err.client_message("Failed to join room")),
            );
        }
    }

    async fn try_join(&self, address: &str, req: JoinRoomRequest) -> Result<(), RoomError> {
        let room_id = non_empty(req.room_id);
        let user_id = non_empty(req.user_id);
        let (Some(room_id), Some(user_id)) = (room_id, user_id) else {
            return Err(RoomError::InvalidRequest(
                "Room ID and User ID are required".to_string(),
            ));
        };
        if self.sessions.lookup(address).is_some() {
            return Err(RoomError::AlreadyJoined);
        }

        let room = self.registry.join_room(&room_id, address, &user_id).await?;
        self.sessions.bind(address, &room.room_id, &user_id);
        crate::logging::info_kv(
            "user joined room",
            &[
                ("user_id", &user_id),
                ("room_id", &room.room_id),
                ("address", address),
            ],
        );

        // Both sides learn about each other from the same post-append snapshot.
        let others = room.others(address);
        for peer in &others {
            self.hub.send(
                &peer.connection_address,
                ServerEvent::UserJoined(PeerNotice {
                    user_id: user_id.clone(),
                    address: address.to_string(),
                    message: format!("{user_id} joined the room"),
                }),
            );
        }
        self.hub.send(
            address,
            ServerEvent::RoomJoined(RoomJoined {
                room_id: room.room_id.clone(),
                participants: others,
                message: "Successfully joined the room".to_string(),
            }),
        );
        Ok(())
    }

    /// Explicit leave. No-op for a connection that is not in a room.
    ///
    /// The binding is only dropped once the store confirms the removal, so a
    /// failed leave is retried by the eventual disconnect.
    pub async fn leave(&self, address: &str) {
        let Some(binding) = self.sessions.lookup(address) else {
            return;
        };
        match self.release(address, &binding).await {
            Ok(()) => {
                self.sessions.unbind(address);
                self.hub.send(
                    address,
                    ServerEvent::LeftRoom(Notice {
                        message: "Successfully left the room".to_string(),
                    }),
                );
            }
            Err(err) => {
                crate::logging::error_kv(
                    "error leaving room",
                    &[
                        ("address", address),
                        ("room_id", &binding.room_id),
                        ("error", &err.to_string()),
                    ],
                );
                self.stats.set_last_error(&err);
                self.hub.send(
                    address,
                    ServerEvent::error(err.client_message("Failed to leave room")),
                );
            }
        }
    }

    /// Transport closed. The connection can no longer receive anything.
    pub async fn disconnect(&self, address: &str) {
        crate::logging::info_kv("user disconnected", &[("address", address)]);
        self.hub.unregister(address);
        let Some(binding) = self.sessions.close(address) else {
            return;
        };
        if let Err(err) = self.release(address, &binding).await {
            crate::logging::error_kv(
                "error handling disconnect",
                &[
                    ("address", address),
                    ("room_id", &binding.room_id),
                    ("error", &err.to_string()),
                ],
            );
            self.stats.set_last_error(&err);
        }
    }

    /// Remove the participant and tell whoever remains.
    async fn release(&self, address: &str, binding: &Binding) -> Result<(), RoomError> {
        let remaining: Option<Room> = self
            .registry
            .remove_participant(&binding.room_id, address)
            .await?;
        crate::logging::info_kv(
            "user left room",
            &[
                ("user_id", &binding.user_id),
                ("room_id", &binding.room_id),
                ("address", address),
            ],
        );
        let Some(room) = remaining else {
            return Ok(());
        };
        for peer in room.others(address) {
            self.hub.send(
                &peer.connection_address,
                ServerEvent::UserLeft(PeerNotice {
                    user_id: binding.user_id.clone(),
                    address: address.to_string(),
                    message: format!("{} left the room", binding.user_id),
                }),
            );
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
