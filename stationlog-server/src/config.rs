use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use stationlog_core::{ValidationError, nonzero_interval};
use ulid::Ulid;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub vendor: VendorConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    /// Session tokens to register at startup; sessions are issued elsewhere.
    #[serde(default)]
    pub sessions: Vec<SessionSeed>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryConfig {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Deserialize)]
pub struct VendorConfig {
    pub base_url: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct DevicesConfig {
    /// A device is online while its latest reading is younger than this.
    #[serde(default = "default_online_window")]
    pub online_window_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SessionSeed {
    pub token: String,
    pub user_id: Ulid,
}

fn default_backup_interval() -> u64 {
    24 * 60 * 60
}

fn default_online_window() -> u64 {
    15 * 60
}

fn default_true() -> bool {
    true
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_backup_interval(),
            enabled: true,
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            online_window_secs: default_online_window(),
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
        if self.backup.enabled {
            nonzero_interval(
                "backup.interval_secs",
                Duration::from_secs(self.backup.interval_secs),
            )?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                http_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            },
            registry: RegistryConfig::Memory,
            vendor: VendorConfig {
                base_url: "https://api.ecoflow.com".to_owned(),
                access_key: String::new(),
                secret_key: String::new(),
            },
            backup: BackupConfig::default(),
            devices: DevicesConfig::default(),
            sessions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_config_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            http_addr = "127.0.0.1:3000"

            [registry]
            type = "sqlite"
            path = "stationlog.db"

            [vendor]
            base_url = "https://api-e.ecoflow.com"
            access_key = "ak"
            secret_key = "sk"

            [[sessions]]
            token = "dev-token"
            user_id = "01J0000000000000000000000A"
            "#,
        )
        .unwrap();

        assert!(matches!(config.registry, RegistryConfig::Sqlite { .. }));
        assert_eq!(config.backup.interval_secs, 86_400);
        assert!(config.backup.enabled);
        assert_eq!(config.devices.online_window_secs, 900);
        assert_eq!(config.sessions[0].token, "dev-token");
    }

    #[test]
    fn zero_backup_interval_fails_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"
            [server]
            http_addr = "127.0.0.1:3000"

            [registry]
            type = "memory"

            [vendor]
            base_url = "https://api-e.ecoflow.com"
            access_key = "ak"
            secret_key = "sk"

            [backup]
            interval_secs = 0
            "#,
        )
        .unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("backup.interval_secs"));
    }
}
