//! Instrument drivers.
//!
//! Each driver maps one device onto one [`FramingClient`] and one fixed
//! [`SampleSchema`]. Drivers differ only in their command vocabulary and in
//! which [`CompletionRule`] their replies follow; all framing and timeout
//! handling lives in [`crate::framing`].
//!
//! | Driver | Rule | Command terminator |
//! |---|---|---|
//! | [`deepvna::DeepVna`] | prompt `ch> ` | `\r` |
//! | [`dl7::Dl7`] | fixed-width stream | none |
//! | [`ion_gauge::IonGauge`] | `>` marker | `\r` |
//! | [`tc290::Tc290`] | line | `\r\n` |
//!
//! [`FramingClient`]: crate::framing::FramingClient

pub mod deepvna;
pub mod dl7;
pub mod ion_gauge;
pub mod tc290;

#[cfg(test)]
pub(crate) mod sim;

use crate::config::{InstrumentConfig, InstrumentKind};
use crate::data::{FieldValue, SampleSchema};
use crate::error::{MonitorError, MonitorResult};
use crate::framing::CompletionRule;
use crate::transport::{self, Transport};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// A connected device that produces one row of values per acquisition.
#[async_trait]
pub trait Instrument: Send {
    /// Columns of every row this instrument produces.
    fn schema(&self) -> &SampleSchema;

    /// Run one acquisition and return values in schema order.
    async fn acquire(&mut self) -> MonitorResult<Vec<FieldValue>>;

    /// Shutdown command(s) sent before the link is closed.
    async fn cleanup(&mut self) -> MonitorResult<()> {
        Ok(())
    }

    /// Close the link. Idempotent.
    async fn close(&mut self) -> MonitorResult<()>;
}

/// Settings every driver takes besides its own.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    /// Per-query timeout.
    pub timeout: Duration,
    /// Completion rule override.
    pub framing: Option<CompletionRule>,
}

impl DriverOptions {
    /// Options with `timeout` and the driver's own completion rule.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            framing: None,
        }
    }

    /// Options taken from an instrument's configuration.
    pub fn from_config(config: &InstrumentConfig) -> Self {
        Self {
            timeout: config.timeout(),
            framing: config.framing.clone(),
        }
    }

    fn rule_or(&self, default: CompletionRule) -> CompletionRule {
        self.framing.clone().unwrap_or(default)
    }
}

/// Decode a driver's `[instruments.settings]` table.
pub(crate) fn parse_settings<T: DeserializeOwned>(kind: InstrumentKind, value: &toml::Value) -> MonitorResult<T> {
    value
        .clone()
        .try_into()
        .map_err(|e| MonitorError::Configuration(format!("invalid {kind} settings: {e}")))
}

/// Split a comma-separated reply into exactly `expected` trimmed fields.
pub(crate) fn split_fields(command: &str, reply: &str, expected: usize) -> MonitorResult<Vec<String>> {
    let fields: Vec<String> = reply.split(',').map(|f| f.trim().to_string()).collect();
    if fields.len() != expected {
        return Err(MonitorError::MalformedResponse(format!(
            "'{command}' returned {} fields, expected {expected}: {reply:?}",
            fields.len()
        )));
    }
    Ok(fields)
}

/// Open the configured transport and connect the configured driver.
///
/// # Errors
///
/// [`MonitorError::Connection`] if the device cannot be opened or does not
/// answer its initialization, [`MonitorError::Configuration`] for bad
/// driver settings.
pub async fn connect(config: &InstrumentConfig) -> MonitorResult<Box<dyn Instrument>> {
    let options = DriverOptions::from_config(config);
    // Decode settings before opening the port so bad settings never touch hardware.
    let instrument: Box<dyn Instrument> = match config.kind {
        InstrumentKind::DeepVna => {
            let settings = parse_settings(config.kind, &config.settings)?;
            let link = open_link(config).await?;
            Box::new(deepvna::DeepVna::connect(link, settings, options).await?)
        }
        InstrumentKind::Dl7 => {
            let settings = parse_settings(config.kind, &config.settings)?;
            let link = open_link(config).await?;
            Box::new(dl7::Dl7::connect(link, settings, options).await?)
        }
        InstrumentKind::IonGauge => {
            let link = open_link(config).await?;
            Box::new(ion_gauge::IonGauge::connect(link, options)?)
        }
        InstrumentKind::Tc290 => {
            let settings = parse_settings(config.kind, &config.settings)?;
            let link = open_link(config).await?;
            Box::new(tc290::Tc290::connect(link, settings, options)?)
        }
    };
    tracing::info!(instrument = %config.id, kind = %config.kind, "instrument connected");
    Ok(instrument)
}

async fn open_link(config: &InstrumentConfig) -> MonitorResult<Box<dyn Transport>> {
    transport::open(&config.transport).await.map_err(|e| match e {
        MonitorError::Connection(msg) => {
            MonitorError::Connection(format!("instrument '{}': {msg}", config.id))
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fields() {
        assert_eq!(
            split_fields("PID? 1", "50.0, 20.0,0.0", 3).unwrap(),
            vec!["50.0", "20.0", "0.0"]
        );
        let err = split_fields("PID? 1", "50.0,20.0", 3).unwrap_err();
        assert!(matches!(err, MonitorError::MalformedResponse(_)));
    }

    #[test]
    fn test_rule_override() {
        let options = DriverOptions {
            timeout: Duration::from_secs(1),
            framing: Some(CompletionRule::line()),
        };
        assert_eq!(options.rule_or(CompletionRule::marker()), CompletionRule::line());
        assert_eq!(
            DriverOptions::with_timeout(Duration::from_secs(1)).rule_or(CompletionRule::marker()),
            CompletionRule::marker()
        );
    }

    #[tokio::test]
    async fn test_connect_bad_settings_is_configuration_error() {
        let config: InstrumentConfig = toml::from_str(
            r#"
            id = "TC290"
            kind = "tc290"
            interval_secs = 1.0
            transport = { type = "serial", port = "/dev/does-not-exist-lab-monitor" }
            [settings]
            outputs = "both"
            "#,
        )
        .unwrap();
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, MonitorError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_connect_missing_device_is_connection_error() {
        let config: InstrumentConfig = toml::from_str(
            r#"
            id = "IonGauge"
            kind = "ion_gauge"
            interval_secs = 1.0
            transport = { type = "serial", port = "/dev/does-not-exist-lab-monitor" }
            "#,
        )
        .unwrap();
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, MonitorError::Connection(_)));
    }
}
