//! Configuration structures for the update engine.
//!
//! Store entry names and byte limits are explicit configuration with
//! documented defaults rather than module-level constants.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Default name of the in-progress download in the store.
pub const DEFAULT_TEMP_NAME: &str = "ota-update.temp.py";

/// Default name of the program the device boots from.
pub const DEFAULT_LIVE_NAME: &str = "main.py";

/// Default hard ceiling on artifact size (100 KiB).
pub const DEFAULT_MAX_SIZE: u64 = 100 * 1024;

/// Default read chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Main update configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Store name for the in-progress download
    #[serde(default = "default_temp_name")]
    pub temp_name: String,

    /// Store name of the live program
    #[serde(default = "default_live_name")]
    pub live_name: String,

    /// Maximum artifact size in bytes
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Download chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Restart handling after a successful install
    #[serde(default)]
    pub restart: RestartConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            temp_name: default_temp_name(),
            live_name: default_live_name(),
            max_size: default_max_size(),
            chunk_size: default_chunk_size(),
            network: NetworkConfig::default(),
            restart: RestartConfig::default(),
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.max_size == 0 {
            return Err(UpdateError::Config("max_size must be > 0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(UpdateError::Config("chunk_size must be > 0".to_string()));
        }
        if self.chunk_size as u64 > self.max_size {
            return Err(UpdateError::Config(format!(
                "chunk_size ({}) must not exceed max_size ({})",
                self.chunk_size, self.max_size
            )));
        }
        validate_entry_name("temp_name", &self.temp_name)?;
        validate_entry_name("live_name", &self.live_name)?;
        if self.temp_name == self.live_name {
            return Err(UpdateError::Config(
                "temp_name and live_name must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Store names live in a flat namespace.
fn validate_entry_name(field: &str, name: &str) -> Result<(), UpdateError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(UpdateError::Config(format!(
            "{} must be a plain file name, got {:?}",
            field, name
        )));
    }
    Ok(())
}

/// Network configuration for downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Read timeout for the streamed body in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,

    /// User agent sent with requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            read_timeout_seconds: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// What the host does once an update is installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Delay before restarting so buffered output can flush
    #[serde(default = "default_grace_delay")]
    pub grace_delay_ms: u64,

    /// Process exit code that asks the supervisor to relaunch the program
    #[serde(default = "default_restart_exit_code")]
    pub exit_code: i32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: default_grace_delay(),
            exit_code: default_restart_exit_code(),
        }
    }
}

// Default value functions for serde
fn default_temp_name() -> String {
    DEFAULT_TEMP_NAME.to_string()
}

fn default_live_name() -> String {
    DEFAULT_LIVE_NAME.to_string()
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("mota-updater/{}", env!("CARGO_PKG_VERSION"))
}

fn default_grace_delay() -> u64 {
    1000
}

fn default_restart_exit_code() -> i32 {
    3
}
