//! Custom error types for the monitor.
//!
//! This module defines the primary error type, `MonitorError`, shared by the
//! transport, framing, analysis and storage layers. Using the `thiserror`
//! crate, it keeps one consistent taxonomy across every instrument driver.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: a device could not be opened, was closed, or hung up.
//!   Fatal at startup.
//! - **`Timeout`**: no complete frame arrived before the deadline. The current
//!   sample is dropped and the scheduler carries on.
//! - **`MalformedResponse`**: a frame arrived but had an unexpected shape.
//! - **`Domain`**: the resonance analysis was handed a degenerate curve, or
//!   the 3dB band has zero width. Never reported as NaN or Inf.
//! - **`Config`** / **`Configuration`**: parse errors from `figment` and
//!   semantic validation failures respectively.
//! - **`Io`**, **`Csv`**, **`Storage`**: persistence failures.
//!
//! [`MonitorError::is_recoverable`] encodes which of these are survivable
//! inside a polling tick.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the monitor error type.
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {timeout:?} waiting for reply to '{command}'")]
    Timeout { command: String, timeout: Duration },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MonitorError {
    /// Whether a polling tick that hit this error may simply drop its sample.
    ///
    /// Connection and configuration problems are not recoverable: they abort
    /// startup, or mean the device is gone.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MonitorError::Timeout { .. }
                | MonitorError::MalformedResponse(_)
                | MonitorError::Domain(_)
        )
    }

    /// Short machine-friendly category, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::Connection(_) => "connection",
            MonitorError::Timeout { .. } => "timeout",
            MonitorError::MalformedResponse(_) => "malformed_response",
            MonitorError::Domain(_) => "domain",
            MonitorError::Config(_) | MonitorError::Configuration(_) => "config",
            MonitorError::Io(_) | MonitorError::Csv(_) | MonitorError::Storage(_) => "storage",
        }
    }
}

impl From<figment::Error> for MonitorError {
    fn from(err: figment::Error) -> Self {
        MonitorError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_policy() {
        let timeout = MonitorError::Timeout {
            command: "frequencies".into(),
            timeout: Duration::from_millis(10),
        };
        assert!(timeout.is_recoverable());
        assert!(MonitorError::MalformedResponse("x".into()).is_recoverable());
        assert!(MonitorError::Domain("x".into()).is_recoverable());
        assert!(!MonitorError::Connection("gone".into()).is_recoverable());
        assert!(!MonitorError::Storage("disk".into()).is_recoverable());
    }

    #[test]
    fn test_timeout_message_names_command() {
        let err = MonitorError::Timeout {
            command: "KRDG?".into(),
            timeout: Duration::from_millis(500),
        };
        let msg = err.to_string();
        assert!(msg.contains("KRDG?"));
        assert!(msg.contains("500ms"));
        assert_eq!(err.kind(), "timeout");
    }
}
