//! Bridge Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/bridge.toml` by default)
//! 2. Environment variables (prefixed with `SAPERA_BRIDGE_`, `__` between sections)
//!
//! # Example
//! ```no_run
//! use sapera_bridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::load()?;
//! println!("Device: {}", config.device.identity());
//! # Ok::<(), figment::Error>(())
//! ```
//!
//! `SAPERA_BRIDGE_DEVICE__DEVICE_INDEX=1` overrides `device.device_index`.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use frame_core::{DeviceIdentity, PixelFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/bridge.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SAPERA_BRIDGE_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// The acquisition device to stream from
    pub device: DeviceConfig,
    /// Simulated frame grabber used when no hardware backend is available
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which device to open and how to configure it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Acquisition server, e.g. "Xtium-CL_MX4_1"
    pub server_name: String,
    /// Index of the device on that server
    #[serde(default)]
    pub device_index: u32,
    /// Camera configuration file (.ccf)
    pub config_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Buffer format the simulated grabber reports
    #[serde(default = "default_format")]
    pub format: PixelFormat,
    /// Time between simulated end-of-frame events
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

// Default value functions
fn default_name() -> String {
    "Sapera Bridge".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_format() -> PixelFormat {
    PixelFormat::Mono8
}

fn default_frame_interval() -> u64 {
    33
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            format: default_format(),
            frame_interval_ms: default_frame_interval(),
        }
    }
}

impl DeviceConfig {
    /// The identity a device session is opened with.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(
            self.server_name.clone(),
            self.device_index,
            self.config_file.clone(),
        )
    }
}

impl BridgeConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if self.device.server_name.trim().is_empty() {
            return Err("device.server_name must not be empty".to_string());
        }

        if self.device.config_file.as_os_str().is_empty() {
            return Err("device.config_file must not be empty".to_string());
        }

        if self.simulation.width == 0 || self.simulation.height == 0 {
            return Err(format!(
                "Invalid simulation resolution {}x{}",
                self.simulation.width, self.simulation.height
            ));
        }

        if self.simulation.frame_interval_ms == 0 {
            return Err("simulation.frame_interval_ms must be at least 1".to_string());
        }

        Ok(())
    }
}
