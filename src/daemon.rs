use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;

use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::registry::RoomRegistry;
use crate::server::{AppState, ServerHandle};
use crate::shutdown::StopSignal;

/// A started server with its store, reaper and listener.
pub struct Daemon {
    registry: RoomRegistry,
    server: ServerHandle,
    reaper: tokio::task::JoinHandle<()>,
    stop: StopSignal,
    reaper_stop: StopSignal,
}

impl Daemon {
    /// Select the store, start the idle reaper and bind the listener.
    pub async fn start(cfg: Config) -> Result<Self> {
        if let Some(log_path) = cfg.log_path.as_deref() {
            crate::logging::init_log_file(log_path)?;
        }
        crate::logging::info(format!(
            "roomsignal start version={} config={} bind={}",
            env!("CARGO_PKG_VERSION"),
            cfg.config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            cfg.bind_addr
        ));

        let store = crate::store::open_store(cfg.database_path.as_deref());
        let registry = RoomRegistry::new(store, cfg.policy());
        crate::logging::info_kv(
            "room registry ready",
            &[
                ("storage", registry.storage_kind().as_str()),
                ("max_participants", &cfg.max_participants.to_string()),
                ("idle_timeout_secs", &cfg.idle_timeout_secs.to_string()),
            ],
        );

        let reaper_stop = StopSignal::new();
        let reaper = registry.spawn_reaper(cfg.reap_interval(), reaper_stop.clone());

        let lifecycle = Arc::new(Lifecycle::new(registry.clone()));
        let state = AppState::new(lifecycle, cfg.list_limit);
        let stop = state.stop.clone();
        let server = match crate::server::start(&cfg.bind_addr, state).await {
            Ok(server) => server,
            Err(err) => {
                reaper_stop.trigger();
                let _ = reaper.await;
                registry.shutdown().await;
                return Err(err);
            }
        };

        Ok(Self {
            registry,
            server,
            reaper,
            stop,
            reaper_stop,
        })
    }

    pub fn bound_addr(&self) -> SocketAddr {
        self.server.bound_addr()
    }

    /// Stop accepting, close open connections, stop the reaper and release the store.
    pub async fn shutdown(self) {
        crate::logging::info("roomsignal shutting down");
        self.stop.trigger();
        self.server.stopped().await;
        self.reaper_stop.trigger();
        let _ = self.reaper.await;
        self.registry.shutdown().await;
        crate::logging::info("roomsignal stopped");
    }
}

/// Run on the *current* tokio runtime until `shutdown` is notified.
pub async fn run_with_shutdown(cfg: Config, shutdown: Arc<Notify>) -> Result<()> {
    let daemon = Daemon::start(cfg).await?;
    crate::logging::info_kv(
        "roomsignal listening",
        &[("addr", &daemon.bound_addr().to_string())],
    );
    shutdown.notified().await;
    daemon.shutdown().await;
    Ok(())
}
