use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use stationlog_core::{ValidationError, nonzero_interval};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the stationlog server
    pub base_url: String,
    /// Value of the `session` cookie sent with every request
    pub session_token: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusConfig {
    /// Address for the status HTTP server to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub min_interval_secs: u64,
    pub manual_min_spacing_secs: u64,
    /// Start the timer as soon as the collector is up
    pub autostart: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueConfig {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub queue: QueueConfig,
    pub poll_interval_secs: u64,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub max_attempts: u32,
    /// Registers a periodic job when set
    pub periodic_interval_secs: Option<u64>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8091)),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5 * 60,
            min_interval_secs: 60,
            manual_min_spacing_secs: 60,
            autostart: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::Memory,
            poll_interval_secs: 15,
            base_backoff_secs: 30,
            max_backoff_secs: 60 * 60,
            max_attempts: 8,
            periodic_interval_secs: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects periods that would stall a timer.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let secs = Duration::from_secs;
        nonzero_interval("scheduler.interval_secs", secs(self.scheduler.interval_secs))?;
        nonzero_interval("sync.poll_interval_secs", secs(self.sync.poll_interval_secs))?;
        nonzero_interval("sync.base_backoff_secs", secs(self.sync.base_backoff_secs))?;
        if let Some(every) = self.sync.periodic_interval_secs {
            nonzero_interval("sync.periodic_interval_secs", secs(every))?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://127.0.0.1:8080".to_owned(),
                session_token: String::new(),
            },
            status: StatusConfig::default(),
            scheduler: SchedulerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}
