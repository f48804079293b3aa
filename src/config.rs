//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration, optional)
//! 2. Environment variables prefixed with `FRELON_SYNC_`, nested keys split on `__`
//!
//! Every field has a default, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use frelon_sync::config::SyncConfig;
//!
//! let config = SyncConfig::load_from("config/frelon_sync.toml")?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), frelon_sync::error::SyncError>(())
//! ```
//!
//! ```toml
//! [application]
//! name = "frelon-sync"
//! log_level = "debug"
//!
//! [detector]
//! device_nb = 0
//! e2v_correction = true
//! channel = { kind = "dual", secondary = 1 }
//!
//! [serial]
//! timeout_ms = 2000
//! ```

use crate::error::{SyncError, SyncResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FRELON_SYNC_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Detector identification and correction intent
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Serial line settings
    #[serde(default)]
    pub serial: SerialConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Acquisition channel layout, fixed when the detector is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquisitionChannel {
    /// One acquisition device
    #[default]
    Single,
    /// Two acquisition devices reading the two halves of the chip
    Dual {
        /// Device number of the second acquisition board
        secondary: u32,
    },
}

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Device number of the primary acquisition board
    #[serde(default)]
    pub device_nb: u32,
    /// Channel layout
    #[serde(default)]
    pub channel: AcquisitionChannel,
    /// Initial E2V correction intent
    #[serde(default = "default_enabled")]
    pub e2v_correction: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            device_nb: 0,
            channel: AcquisitionChannel::Single,
            e2v_correction: default_enabled(),
        }
    }
}

/// Serial line configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Line terminator separating response lines
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
    /// Normal response timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            line_terminator: default_line_terminator(),
            timeout_ms: default_timeout(),
        }
    }
}

impl SerialConfig {
    /// Response timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Default value functions
fn default_name() -> String {
    "frelon-sync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_line_terminator() -> String {
    "\r\n".to_string()
}

fn default_timeout() -> u64 {
    2000
}

impl SyncConfig {
    /// Defaults overridden by environment variables only.
    pub fn load() -> SyncResult<Self> {
        Ok(Self::base_figment()
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Load configuration from a TOML file, then environment variables.
    ///
    /// A missing file is not an error: defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        Ok(Self::base_figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(SyncConfig::default()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SyncResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SyncError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.line_terminator.is_empty() {
            return Err(SyncError::Configuration(
                "serial.line_terminator must not be empty".to_string(),
            ));
        }

        if self.serial.timeout_ms == 0 {
            return Err(SyncError::Configuration(
                "serial.timeout_ms must be greater than zero".to_string(),
            ));
        }

        if let AcquisitionChannel::Dual { secondary } = self.detector.channel {
            if secondary == self.detector.device_nb {
                return Err(SyncError::Configuration(format!(
                    "Dual channel secondary device {secondary} is the primary device"
                )));
            }
        }

        Ok(())
    }
}
