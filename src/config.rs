//! Driver configuration using Figment
//!
//! Configuration is merged from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`config/rust_indi.toml` by default)
//! 3. environment variables prefixed with `RUST_INDI_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use rust_indi::config::DriverConfig;
//!
//! let config = DriverConfig::load()?;
//! println!("Device: {}", config.driver.device);
//! # Ok::<(), rust_indi::error::IndiError>(())
//! ```
//!
//! `RUST_INDI_IO__CHUNK_SIZE=4096` overrides `[io] chunk_size`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppResult, IndiError};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/rust_indi.toml";

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DriverConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Outbound channel and buffering
    #[serde(default)]
    pub io: IoConfig,
    /// Simulated device settings
    #[serde(default)]
    pub driver: DeviceConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// How to pick the outbound channel implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Probe fd 1: local socket if it is one, byte stream otherwise.
    #[default]
    Auto,
    /// Always a byte stream; BLOBs go inline as base64.
    Stream,
    /// Require a local socket; BLOBs go as descriptors.
    Socket,
}

/// Outbound buffering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoConfig {
    /// Buffer growth granularity in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Buffered bytes that force an early flush mid-message
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// Channel selection
    #[serde(default)]
    pub channel: ChannelMode,
    /// Descriptors one message may carry
    #[serde(default = "default_max_attachments")]
    pub max_attachments: usize,
}

/// Simulated device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name used on the wire
    #[serde(default = "default_device")]
    pub device: String,
    /// Period of the polling timer in milliseconds
    #[serde(default = "default_poll_period")]
    pub poll_period_ms: u64,
}

// Default value functions
fn default_name() -> String {
    "rust_indi".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_chunk_size() -> usize {
    49_152
}

fn default_flush_threshold() -> usize {
    1024 * 1024
}

fn default_max_attachments() -> usize {
    16
}

fn default_device() -> String {
    "Simulator".to_string()
}

fn default_poll_period() -> u64 {
    1000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            flush_threshold: default_flush_threshold(),
            channel: ChannelMode::default(),
            max_attachments: default_max_attachments(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            poll_period_ms: default_poll_period(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from the default path and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUST_INDI_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(IndiError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(IndiError::Config(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.io.chunk_size == 0 {
            return Err(IndiError::Config("io.chunk_size must be positive".into()));
        }
        if self.io.flush_threshold < self.io.chunk_size {
            return Err(IndiError::Config(format!(
                "io.flush_threshold ({}) must be at least io.chunk_size ({})",
                self.io.flush_threshold, self.io.chunk_size
            )));
        }
        // SCM_RIGHTS carries at most 253 descriptors per message on Linux
        if self.io.max_attachments == 0 || self.io.max_attachments > 253 {
            return Err(IndiError::Config(format!(
                "Invalid io.max_attachments {}. Must be 1-253",
                self.io.max_attachments
            )));
        }

        if self.driver.device.is_empty() {
            return Err(IndiError::Config("driver.device must not be empty".into()));
        }
        if self.driver.device.len() > crate::property::MAX_NAME_LEN {
            return Err(IndiError::Config(format!(
                "driver.device is longer than {} bytes",
                crate::property::MAX_NAME_LEN
            )));
        }
        if self.driver.poll_period_ms == 0 {
            return Err(IndiError::Config("driver.poll_period_ms must be positive".into()));
        }

        Ok(())
    }
}
