use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct RelayStats {
    connections_total: AtomicU64,
    relayed: AtomicU64,
    dropped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl RelayStats {
    pub fn on_connect(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_relayed(&self) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_error(&self, err: impl ToString) {
        let mut g = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *g = Some(err.to_string());
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        let last_error = self
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default();
        RelayStatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            relayed_total: self.relayed.load(Ordering::Relaxed),
            dropped_total: self.dropped.load(Ordering::Relaxed),
            last_error,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayStatsSnapshot {
    pub connections_total: u64,
    pub relayed_total: u64,
    pub dropped_total: u64,
    pub last_error: String,
}
