pub mod config;
pub mod daemon;
pub mod error;
pub mod hub;
pub mod ids;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod sessions;
pub mod shutdown;
pub mod store;
pub mod telemetry;
