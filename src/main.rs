use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use roomsignal::config::{Config, ConfigOverrides};

#[derive(Parser, Debug)]
#[command(name = "roomsignal", version, about = "Room coordination and WebRTC signaling relay")]
struct Cli {
    /// Path to a JSON config file
    #[arg(short = 'c', long = "config", env = "ROOMSIGNAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP room API and signaling endpoint
    Serve {
        /// Listen address (numeric ip:port)
        #[arg(long = "addr")]
        addr: Option<String>,

        /// Listen port; replaces the port of the listen address
        #[arg(long = "port", env = "PORT")]
        port: Option<u16>,

        /// SQLite database for durable rooms; in-process storage if unset or unusable
        #[arg(long = "database", env = "ROOMSIGNAL_DATABASE")]
        database: Option<PathBuf>,

        /// Capacity of newly created rooms
        #[arg(long = "max-participants")]
        max_participants: Option<usize>,

        /// Write logs to this file in addition to stdout
        #[arg(long = "log-file")]
        log_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            addr,
            port,
            database,
            max_participants,
            log_file,
        } => {
            let cfg = Config::load_with_overrides(
                cli.config.as_deref(),
                ConfigOverrides {
                    bind_addr: addr,
                    port,
                    database_path: database,
                    max_participants,
                    log_path: log_file,
                },
            )?;

            let shutdown = Arc::new(tokio::sync::Notify::new());
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal.notify_one();
                }
            });
            roomsignal::daemon::run_with_shutdown(cfg, shutdown).await?;
        }
    }

    Ok(())
}
