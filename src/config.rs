use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::registry::RoomPolicy;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_max_participants() -> usize {
    2
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_list_limit() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_path: None,
            max_participants: default_max_participants(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            list_limit: default_list_limit(),
            log_path: None,
            config_path: None,
        }
    }
}

/// Values from the command line / environment. Anything set here wins over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_addr: Option<String>,
    pub port: Option<u16>,
    pub database_path: Option<PathBuf>,
    pub max_participants: Option<usize>,
    pub log_path: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut cfg: Config = serde_json::from_str(&data).context("parse config json")?;
        cfg.config_path = Some(path.to_path_buf());
        cfg.normalize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path` if given (defaults otherwise), then apply `overrides`.
    pub fn load_with_overrides(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        cfg.apply(overrides)?;
        cfg.normalize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(addr) = overrides.bind_addr {
            self.bind_addr = addr;
        }
        if let Some(port) = overrides.port {
            let addr: SocketAddr = self
                .bind_addr
                .trim()
                .parse()
                .with_context(|| format!("bind_addr {}", self.bind_addr))?;
            self.bind_addr = SocketAddr::new(addr.ip(), port).to_string();
        }
        if let Some(db) = overrides.database_path {
            self.database_path = Some(db);
        }
        if let Some(n) = overrides.max_participants {
            self.max_participants = n;
        }
        if let Some(log) = overrides.log_path {
            self.log_path = Some(log);
        }
        Ok(())
    }

    fn normalize(&mut self) -> Result<()> {
        self.bind_addr = self.bind_addr.trim().to_string();
        if self
            .database_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            self.database_path = None;
        }
        if let Some(db) = self.database_path.as_mut() {
            if db.is_relative() {
                let cwd = std::env::current_dir().context("resolve current dir")?;
                *db = cwd.join(&*db);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("bind_addr must be numeric ip:port, got {}", self.bind_addr))?;
        if self.max_participants == 0 {
            anyhow::bail!("max_participants must be at least 1");
        }
        if self.idle_timeout_secs == 0 {
            anyhow::bail!("idle_timeout_secs must be positive");
        }
        if self.reap_interval_secs == 0 {
            anyhow::bail!("reap_interval_secs must be positive");
        }
        if self.list_limit == 0 {
            anyhow::bail!("list_limit must be at least 1");
        }
        Ok(())
    }

    pub fn policy(&self) -> RoomPolicy {
        RoomPolicy {
            max_participants: self.max_participants,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}
