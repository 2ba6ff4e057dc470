//! Structured logging setup.
//!
//! Built on `tracing` and `tracing-subscriber`:
//! - console output in pretty, compact or JSON format
//! - an optional plain-text log file written alongside the console
//! - `RUST_LOG` overrides the configured level
//!
//! # Example
//! ```no_run
//! use lab_monitor::{config::MonitorConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(task = %config.storage.task, "monitor starting");
//! # Ok(())
//! # }
//! ```

use crate::config::{ApplicationConfig, MonitorConfig};
use crate::error::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Console output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, colored (interactive use)
    #[default]
    Pretty,
    /// One line per event, no colors
    Compact,
    /// One JSON object per event
    Json,
}

/// Logging options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Console format
    pub format: LogFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (only for Pretty format)
    pub with_ansi: bool,
    /// File that receives a copy of every event
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_file_and_line: false,
            with_thread_names: false,
            with_ansi: true,
            log_file: None,
        }
    }
}

impl LoggingConfig {
    /// Logging options from the `[application]` table.
    pub fn from_application(app: &ApplicationConfig) -> MonitorResult<Self> {
        Ok(Self {
            level: parse_log_level(&app.log_level)?,
            format: app.log_format,
            log_file: app.log_file.clone(),
            ..Default::default()
        })
    }

    /// Options at `level`, everything else default.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set console format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Also append events to `path`
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize logging from the monitor configuration.
pub fn init_from_config(config: &MonitorConfig) -> MonitorResult<()> {
    init(LoggingConfig::from_application(&config.application)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed this returns `Ok(())`,
/// which keeps it safe to call from tests.
pub fn init(config: LoggingConfig) -> MonitorResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = fmt::layer()
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);
    layers.push(match config.format {
        LogFormat::Pretty => console.pretty().with_ansi(config.with_ansi).boxed(),
        LogFormat::Compact => console.compact().with_ansi(false).boxed(),
        LogFormat::Json => console.json().boxed(),
    });

    if let Some(path) = &config.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                MonitorError::Configuration(format!(
                    "cannot open log file {}: {e}",
                    path.display()
                ))
            })?;
        layers.push(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .or_else(|e| {
            // Expected in tests, where many cases race to install a subscriber.
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(MonitorError::Configuration(format!(
                    "Failed to initialize tracing: {e}"
                )))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> MonitorResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(MonitorError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_from_application() {
        let app = ApplicationConfig {
            name: "Cryostat monitor".into(),
            log_level: "debug".into(),
            log_format: LogFormat::Json,
            log_file: Some("Cryostat.log".into()),
        };
        let config = LoggingConfig::from_application(&app).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file, Some(PathBuf::from("Cryostat.log")));
    }

    #[test]
    fn test_builder() {
        let config = LoggingConfig::new(Level::WARN)
            .with_format(LogFormat::Compact)
            .with_ansi(false)
            .with_log_file("monitor.log");
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(!config.with_ansi);
        assert!(config.log_file.is_some());
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig::new(Level::INFO).with_log_file(dir.path().join("a.log"));
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }

    #[test]
    fn test_unwritable_log_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig::new(Level::INFO)
            .with_log_file(dir.path().join("missing").join("a.log"));
        assert!(init(config).is_err());
    }
}
