//! DL7 pressure gauge driver
//!
//! Protocol Overview:
//! - TCP, port 8234
//! - The gauge streams readings unprompted; nothing is ever sent to it
//! - Each record is 13 bytes plus CR, e.g. `2.5  E - 3 Pa\r`
//! - The reading is the record without its unit and with spaces removed,
//!   e.g. `2.5E-3`, persisted verbatim
//!
//! On connect the stream is aligned to a record boundary; every acquisition
//! then reports the newest complete record.

use super::{DriverOptions, Instrument};
use crate::data::{FieldValue, SampleSchema};
use crate::error::{MonitorError, MonitorResult};
use crate::framing::{CompletionRule, FramingClient};
use crate::transport::Transport;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Default TCP port of the gauge.
pub const DEFAULT_PORT: u16 = 8234;

fn default_settle_secs() -> f64 {
    1.0
}

/// DL7 settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dl7Settings {
    /// Wait after connecting before aligning to the stream.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,
}

impl Default for Dl7Settings {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
        }
    }
}

/// Driver for the DL7.
pub struct Dl7 {
    client: FramingClient,
    rule: CompletionRule,
    timeout: Duration,
    schema: SampleSchema,
}

impl Dl7 {
    /// Align to the record stream over an open link.
    pub async fn connect(
        transport: Box<dyn Transport>,
        settings: Dl7Settings,
        options: DriverOptions,
    ) -> MonitorResult<Self> {
        if !(settings.settle_secs.is_finite() && settings.settle_secs >= 0.0) {
            return Err(MonitorError::Configuration(format!(
                "dl7 settle_secs must be non-negative, got {}",
                settings.settle_secs
            )));
        }
        let rule = options.rule_or(CompletionRule::fixed_width());
        if !rule.is_streaming() {
            return Err(MonitorError::Configuration(
                "dl7 needs the fixed_width_streaming rule".into(),
            ));
        }

        let mut client = FramingClient::new(transport, "");
        client
            .align_stream(&rule, Duration::from_secs_f64(settings.settle_secs))
            .await?;
        Ok(Self {
            client,
            rule,
            timeout: options.timeout,
            schema: SampleSchema::new(["Pressure(Pa)"]),
        })
    }

    /// Newest reading in Pa.
    ///
    /// Returns [`crate::framing::STREAM_SENTINEL`] when bytes arrived but no
    /// full record did.
    pub async fn pressure(&mut self) -> MonitorResult<String> {
        self.client.query("", &self.rule, self.timeout).await
    }
}

#[async_trait]
impl Instrument for Dl7 {
    fn schema(&self) -> &SampleSchema {
        &self.schema
    }

    async fn acquire(&mut self) -> MonitorResult<Vec<FieldValue>> {
        Ok(vec![FieldValue::Text(self.pressure().await?)])
    }

    async fn close(&mut self) -> MonitorResult<()> {
        self.client.close().await
    }
}
