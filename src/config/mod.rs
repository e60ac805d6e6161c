//! # Configuration Management Module
//!
//! TOML configuration for the serial link, database timeouts, the JSON cache and
//! logging.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use insteon_linkdb::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("PLM port: {}", config.transport.port);
//!     let tuning = config.database.tuning();
//!     println!("link read timeout: {:?}", tuning.link_read_timeout);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [transport]
//! port = "/dev/ttyUSB0"
//! baud_rate = 19200
//!
//! [database]
//! link_read_timeout_ms = 6000
//! modem_read_timeout_ms = 30000
//!
//! [cache]
//! file = "data/linkdb_cache.json"
//! save_on_exit = true
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every `[database]` key is optional; missing keys fall back to the built-in
//! timeouts.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::database::link_db::DEFAULT_FIRST_LOCATION;
use crate::database::DatabaseTuning;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transport: TransportConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    19200
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Device link table reads (ms). Defaults to 6000.
    #[serde(default)]
    pub link_read_timeout_ms: Option<u64>,
    /// Device link table writes (ms). Defaults to 6000.
    #[serde(default)]
    pub link_write_timeout_ms: Option<u64>,
    /// Modem get-first/get-next enumeration (ms). Defaults to 30000.
    #[serde(default)]
    pub modem_read_timeout_ms: Option<u64>,
    /// Modem manage-all-link writes (ms). Defaults to 2000.
    #[serde(default)]
    pub modem_write_timeout_ms: Option<u64>,
    /// Watchdog period (ms). Defaults to 1000.
    #[serde(default)]
    pub watchdog_interval_ms: Option<u64>,
    /// Location of the first link record on devices. Defaults to 0x0FFF.
    #[serde(default)]
    pub first_record_location: Option<u16>,
}

impl DatabaseConfig {
    pub fn tuning(&self) -> DatabaseTuning {
        let defaults = DatabaseTuning::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        DatabaseTuning {
            link_read_timeout: ms(self.link_read_timeout_ms, defaults.link_read_timeout),
            link_write_timeout: ms(self.link_write_timeout_ms, defaults.link_write_timeout),
            modem_read_timeout: ms(self.modem_read_timeout_ms, defaults.modem_read_timeout),
            modem_write_timeout: ms(self.modem_write_timeout_ms, defaults.modem_write_timeout),
            watchdog_interval: ms(self.watchdog_interval_ms, defaults.watchdog_interval),
        }
    }

    pub fn first_record_location(&self) -> u16 {
        self.first_record_location.unwrap_or(DEFAULT_FIRST_LOCATION)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub file: String,
    #[serde(default = "default_true")]
    pub save_on_exit: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file: "data/linkdb_cache.json".to_string(),
            save_on_exit: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            transport: TransportConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: default_baud_rate(),
            },
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("insteon-linkdb.log".to_string()),
            },
        }
    }
}
