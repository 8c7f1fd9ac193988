//! # Configuration Management Module
//!
//! Centralized configuration for the mesh messaging service: structured
//! TOML with serde, validation on load, and sensible defaults for every
//! value.
//!
//! ## Configuration Structure
//!
//! - [`RadioConfig`] - serial port, baud rate and our node id
//! - [`QueueConfig`] - drain interval, retry bound, retention window
//! - [`StorageConfig`] - durable store location
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [radio]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! source_id = 0            # 0 = derive from the radio
//!
//! [queue]
//! drain_interval_secs = 30
//! max_retries = 3
//! retention_days = 7
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Serial port of the radio or bridge (e.g. /dev/ttyUSB0, COM7).
    pub port: String,
    pub baud_rate: u32,
    /// Node id stamped into outgoing frame headers. 0 lets the radio's own
    /// id stand in once known.
    #[serde(default)]
    pub source_id: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            source_id: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds between drain passes while connected. A flat interval, not
    /// a backoff schedule.
    pub drain_interval_secs: u64,
    /// Send attempts before a pending message is parked as failed.
    pub max_retries: u32,
    /// Days sent/received records are kept before purging.
    pub retention_days: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: 30,
            max_retries: crate::queue::DEFAULT_MAX_RETRIES,
            retention_days: crate::queue::DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of: error, warn, info, debug, trace.
    pub level: String,
    /// Optional log file; when set, logs go there as well as the console.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("cannot read config {}: {}", path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("invalid config {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a starter configuration with default values.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.drain_interval_secs == 0 {
            return Err(anyhow!("queue.drain_interval_secs must be at least 1"));
        }
        if self.queue.max_retries == 0 {
            return Err(anyhow!("queue.max_retries must be at least 1"));
        }
        if self.queue.retention_days <= 0 {
            return Err(anyhow!("queue.retention_days must be positive"));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir must not be empty"));
        }
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => return Err(anyhow!("unknown logging.level: {}", other)),
        }
        Ok(())
    }
}
