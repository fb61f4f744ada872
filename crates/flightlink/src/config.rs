//! Configuration management for flightlink.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::payload::MAX_TEXT_LEN;
use crate::protocol::DeviceInfo;
use crate::session::{SessionTimeouts, FIRMWARE_VERSION};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name used under the platform config and data directories.
const APP_DIR_NAME: &str = "flightlink";

/// Prefix of environment variables overriding configuration values.
const ENV_PREFIX: &str = "FLIGHTLINK_";

/// Default address of the maintenance link server.
const DEFAULT_ADDRESS: &str = "127.0.0.1:7878";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FLIGHTLINK_`, sections split on `__`)
/// 2. TOML config file at `~/.config/flightlink/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device identity.
    pub device: DeviceConfig,
    /// Link timing.
    pub link: LinkConfig,
    /// Flight storage.
    pub storage: StorageConfig,
    /// Device-side server.
    pub server: ServerConfig,
    /// Companion-side client.
    pub client: ClientConfig,
}

/// Identity reported by `device_infos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// User-visible device name.
    pub name: String,
    /// Hardware board name.
    pub board: String,
}

/// Link timing, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Maximum gap between two bytes of one frame.
    pub inter_byte_timeout_ms: u64,
    /// How long a multi-part dialogue waits for the next continuation.
    pub continuation_timeout_ms: u64,
    /// How long the idle server loop waits before checking for shutdown.
    pub idle_poll_ms: u64,
    /// How long the client waits for each response.
    pub response_timeout_ms: u64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage root holding the `flights` directory.
    /// Defaults to `~/.local/share/flightlink`
    pub root: Option<PathBuf>,
}

/// Server-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to accept the companion tool on.
    pub listen: String,
}

/// Client-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of the device to connect to.
    pub connect: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "open-vario".to_string(),
            board: "simulator".to_string(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            inter_byte_timeout_ms: 500,
            continuation_timeout_ms: 1000,
            idle_poll_ms: 1000,
            response_timeout_ms: 2000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_ADDRESS.to_string(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect: DEFAULT_ADDRESS.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `FLIGHTLINK_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(APP_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let link = &self.link;
        for (name, value) in [
            ("inter_byte_timeout_ms", link.inter_byte_timeout_ms),
            ("continuation_timeout_ms", link.continuation_timeout_ms),
            ("idle_poll_ms", link.idle_poll_ms),
            ("response_timeout_ms", link.response_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if link.inter_byte_timeout_ms >= link.continuation_timeout_ms {
            return Err(Error::ConfigValidation {
                message: format!(
                    "inter_byte_timeout_ms ({}) must be less than continuation_timeout_ms ({})",
                    link.inter_byte_timeout_ms, link.continuation_timeout_ms
                ),
            });
        }

        for (name, value) in [
            ("device name", &self.device.name),
            ("board name", &self.device.board),
        ] {
            if value.is_empty() || value.len() > MAX_TEXT_LEN {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be 1 to {MAX_TEXT_LEN} bytes long"),
                });
            }
        }

        Ok(())
    }

    /// Get the storage root, resolving defaults if not set.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.storage
            .root
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Identity the device reports.
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.device.name.clone(),
            board: self.device.board.clone(),
            firmware_version: FIRMWARE_VERSION.to_string(),
        }
    }

    /// Get the inter-byte timeout as a Duration.
    #[must_use]
    pub fn inter_byte_timeout(&self) -> Duration {
        Duration::from_millis(self.link.inter_byte_timeout_ms)
    }

    /// Get the client response timeout as a Duration.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.link.response_timeout_ms)
    }

    /// Get the session loop timing.
    #[must_use]
    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            continuation: Duration::from_millis(self.link.continuation_timeout_ms),
            idle_poll: Duration::from_millis(self.link.idle_poll_ms),
        }
    }
}
