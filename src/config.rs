//! Monitor configuration loaded with figment.
//!
//! Configuration is read from:
//! 1. a TOML file (default `config/monitor.toml`)
//! 2. environment variables prefixed with `LAB_MONITOR_`, nested keys
//!    separated by `__`
//!
//! # Example
//! ```no_run
//! use lab_monitor::config::MonitorConfig;
//!
//! let config = MonitorConfig::load()?;
//! config.validate()?;
//! println!("Task: {}", config.storage.task);
//! # Ok::<(), lab_monitor::error::MonitorError>(())
//! ```
//!
//! `LAB_MONITOR_APPLICATION__LOG_LEVEL=debug` overrides
//! `application.log_level`.

use crate::error::{MonitorError, MonitorResult};
use crate::framing::CompletionRule;
use crate::logging::LogFormat;
use crate::transport::TransportAddress;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LAB_MONITOR_";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Where and whether to persist samples
    pub storage: StorageConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console log format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Optional log file, appended to alongside the console
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for log files
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Task name, the first part of every log file name
    pub task: String,
    /// Whether samples are written to disk at all
    #[serde(default = "default_true")]
    pub save_data: bool,
}

/// Supported instrument drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// DeepVNA network analyzer
    #[serde(rename = "deepvna")]
    DeepVna,
    /// DL7 pressure gauge
    Dl7,
    /// Hot-cathode ion gauge controller
    IonGauge,
    /// TC290 temperature controller
    Tc290,
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InstrumentKind::DeepVna => "deepvna",
            InstrumentKind::Dl7 => "dl7",
            InstrumentKind::IonGauge => "ion_gauge",
            InstrumentKind::Tc290 => "tc290",
        })
    }
}

/// One monitored instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Unique id, also the subsystem name in log file names
    pub id: String,
    /// Driver
    pub kind: InstrumentKind,
    /// Seconds between polls
    pub interval_secs: f64,
    /// Samples kept for live display
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Seconds between live display refreshes
    #[serde(default = "default_display_interval")]
    pub display_interval_secs: f64,
    /// Start polling on a whole wall-clock second
    #[serde(default)]
    pub align_to_second: bool,
    /// Log every sample at info level
    #[serde(default = "default_true")]
    pub print_samples: bool,
    /// Per-query timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Where the device lives
    pub transport: TransportAddress,
    /// Completion rule override; each driver has a default
    #[serde(default)]
    pub framing: Option<CompletionRule>,
    /// Driver-specific settings
    #[serde(default = "empty_table")]
    pub settings: toml::Value,
}

impl InstrumentConfig {
    /// Polling interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    /// Display refresh interval.
    pub fn display_interval(&self) -> Duration {
        Duration::from_secs_f64(self.display_interval_secs)
    }

    /// Query timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> MonitorResult<()> {
        let bad = |msg: String| Err(MonitorError::Configuration(msg));
        if self.id.trim().is_empty() {
            return bad("instrument id must not be empty".into());
        }
        if !(self.interval_secs.is_finite() && self.interval_secs > 0.0) {
            return bad(format!(
                "instrument '{}': interval_secs must be positive, got {}",
                self.id, self.interval_secs
            ));
        }
        if !(self.display_interval_secs.is_finite() && self.display_interval_secs > 0.0) {
            return bad(format!(
                "instrument '{}': display_interval_secs must be positive, got {}",
                self.id, self.display_interval_secs
            ));
        }
        if self.history_capacity == 0 {
            return bad(format!(
                "instrument '{}': history_capacity must be at least 1",
                self.id
            ));
        }
        if !self.settings.is_table() {
            return bad(format!("instrument '{}': settings must be a table", self.id));
        }
        self.transport.validate().map_err(|e| {
            MonitorError::Configuration(format!("instrument '{}': {e}", self.id))
        })?;
        if let Some(rule) = &self.framing {
            rule.validate().map_err(|e| {
                MonitorError::Configuration(format!("instrument '{}': {e}", self.id))
            })?;
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_history_capacity() -> usize {
    600
}

fn default_display_interval() -> f64 {
    5.0
}

fn default_timeout_ms() -> u64 {
    5000
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::Table::new())
}

impl MonitorConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> MonitorResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MonitorResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Semantic checks the types cannot express.
    pub fn validate(&self) -> MonitorResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MonitorError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.storage.task.trim().is_empty() {
            return Err(MonitorError::Configuration(
                "storage.task must not be empty".into(),
            ));
        }

        let mut ids = std::collections::HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(&instrument.id) {
                return Err(MonitorError::Configuration(format!(
                    "Duplicate instrument ID: {}",
                    instrument.id
                )));
            }
            instrument.validate()?;
        }

        Ok(())
    }

    /// Look up one instrument by id.
    pub fn instrument(&self, id: &str) -> MonitorResult<&InstrumentConfig> {
        self.instruments
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| {
                let known: Vec<&str> = self.instruments.iter().map(|i| i.id.as_str()).collect();
                MonitorError::Configuration(format!(
                    "no instrument '{id}' in configuration (known: {})",
                    known.join(", ")
                ))
            })
    }
}
