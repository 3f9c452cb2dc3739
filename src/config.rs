//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. `config/sortgate.toml` (or the file given with `--config`)
//! 2. Environment variables prefixed with `SORTGATE_`, using `__` between
//!    nesting levels (e.g. `SORTGATE_SERIAL__BAUD_RATE=57600`)
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration for the standard gate controller firmware.
//!
//! # Example
//! ```no_run
//! use sortgate::config::SortgateConfig;
//!
//! let config = SortgateConfig::load()?;
//! println!("Baud rate: {}", config.serial.baud_rate);
//! # Ok::<(), sortgate::error::SortgateError>(())
//! ```

use crate::error::{AppResult, SortgateError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/sortgate.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortgateConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link parameters and reconnect policy
    pub serial: SerialConfig,
    /// Command dispatch and gate dwell
    pub dispatch: DispatchConfig,
    /// Inventory service endpoint
    pub notification: NotificationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "sortgate".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate of the gate controller
    pub baud_rate: u32,
    /// Port read timeout
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Upper bound on a single write
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Pause after closing a stale handle so the OS can release the device
    #[serde(with = "humantime_serde")]
    pub release_delay: Duration,
    /// Pause after opening a port before the first write
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Minimum time between the start of two connection attempts
    #[serde(with = "humantime_serde")]
    pub min_reconnect_interval: Duration,
    /// Consecutive connect failures tolerated before status reports an alert
    pub failure_alert_threshold: u32,
    /// Glob patterns to scan instead of the platform defaults
    pub port_patterns: Option<Vec<String>>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            release_delay: Duration::from_millis(500),
            settle_delay: Duration::from_millis(200),
            min_reconnect_interval: Duration::from_secs(2),
            failure_alert_threshold: 3,
            port_patterns: None,
        }
    }
}

/// How the pending gate close gets fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoCloseMode {
    /// A timer task wakes at the deadline and closes the gate.
    #[default]
    Background,
    /// The deadline is only checked when a trigger calls `tick()`.
    Opportunistic,
}

/// Command dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Total write attempts per command
    pub write_attempts: u32,
    /// Pause between write attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Pause after a successful write so the firmware can latch the byte
    #[serde(with = "humantime_serde")]
    pub post_write_delay: Duration,
    /// How long a gate stays open before the automatic close
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
    /// Auto-close strategy
    pub auto_close: AutoCloseMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            write_attempts: 2,
            retry_delay: Duration::from_millis(500),
            post_write_delay: Duration::from_millis(50),
            dwell: Duration::from_secs(5),
            auto_close: AutoCloseMode::Background,
        }
    }
}

/// Inventory notification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Base URL of the inventory service, e.g. `http://192.168.1.100:5173`.
    /// Notifications are skipped when unset.
    pub base_url: Option<String>,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl SortgateConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(SortgateConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SORTGATE_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SortgateError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(SortgateError::Validation(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(SortgateError::Validation(
                "serial.baud_rate must be greater than 0".to_string(),
            ));
        }

        if self.serial.write_timeout.is_zero() {
            return Err(SortgateError::Validation(
                "serial.write_timeout must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.write_attempts == 0 {
            return Err(SortgateError::Validation(
                "dispatch.write_attempts must be at least 1".to_string(),
            ));
        }

        if self.dispatch.dwell.is_zero() {
            return Err(SortgateError::Validation(
                "dispatch.dwell must be greater than 0".to_string(),
            ));
        }

        if let Some(patterns) = &self.serial.port_patterns {
            if let Some(bad) = patterns.iter().find(|p| glob::Pattern::new(p).is_err()) {
                return Err(SortgateError::Validation(format!(
                    "Invalid port pattern '{bad}'"
                )));
            }
        }

        if let Some(base) = &self.notification.base_url {
            match reqwest::Url::parse(base) {
                Ok(url) if matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base() => {}
                Ok(url) => {
                    return Err(SortgateError::Validation(format!(
                        "notification.base_url must be http(s), got scheme '{}'",
                        url.scheme()
                    )))
                }
                Err(e) => {
                    return Err(SortgateError::Validation(format!(
                        "Invalid notification.base_url '{base}': {e}"
                    )))
                }
            }
        }

        Ok(())
    }
}
