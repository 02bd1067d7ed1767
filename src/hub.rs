use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::model::Address;
use crate::protocol::ServerEvent;

/// Events a connection may have waiting to be written to its socket. A peer
/// that falls this far behind loses further events until it catches up.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Outbound channel of every open connection, keyed by address.
///
/// Delivery is immediate or not at all: sending to an unknown or closed
/// connection, or to one whose outbound buffer is full, drops the event.
#[derive(Debug, Default)]
pub struct Hub {
    conns: RwLock<HashMap<Address, mpsc::Sender<ServerEvent>>>,
}

/// Outbound channel pair for a new connection.
pub fn outbound_channel() -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: &str, tx: mpsc::Sender<ServerEvent>) {
        self.conns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string(), tx);
    }

    pub fn unregister(&self, address: &str) {
        self.conns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address);
    }

    /// Returns whether the event was handed to a live connection.
    pub fn send(&self, address: &str, event: ServerEvent) -> bool {
        let conns = self.conns.read().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = conns.get(address) else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                crate::logging::warn_kv("outbound buffer full, dropping event", &[("address", address)]);
                false
            }
            // the socket task already exited
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.conns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.conns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
