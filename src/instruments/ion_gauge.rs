//! Ion gauge controller driver
//!
//! Protocol Overview:
//! - RS-232 over USB, 9600 baud, usually addressed by USB serial number
//! - Command terminator: CR (\r)
//! - Replies carry the value after a `>` marker, e.g. `*01_>1.23E-07\r`
//! - `#0002UHFIG1` reads pressure, `#0032UHFIG1` reads emission status
//!   (`01` while a filament is emitting)

use super::{DriverOptions, Instrument};
use crate::data::{FieldValue, SampleSchema};
use crate::error::{MonitorError, MonitorResult};
use crate::framing::{CompletionRule, FramingClient};
use crate::transport::Transport;
use async_trait::async_trait;
use std::time::Duration;

const READ_PRESSURE: &str = "#0002UHFIG1";
const READ_EMISSION: &str = "#0032UHFIG1";
const EMISSION_OFF: &str = "#0030UHFIG1";
const FILAMENT_1_ON: &str = "#0031UHFIG1";
const FILAMENT_2_ON: &str = "#0033UHFIG1";

/// Gauge filament.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filament {
    /// Filament 1
    One,
    /// Filament 2
    Two,
}

/// Driver for the ion gauge controller.
pub struct IonGauge {
    client: FramingClient,
    rule: CompletionRule,
    timeout: Duration,
    schema: SampleSchema,
}

impl IonGauge {
    /// Wrap an open link. The gauge needs no initialization.
    pub fn connect(transport: Box<dyn Transport>, options: DriverOptions) -> MonitorResult<Self> {
        let rule = options.rule_or(CompletionRule::marker());
        if rule.is_streaming() {
            return Err(MonitorError::Configuration(
                "ion gauge replies cannot be read as a record stream".into(),
            ));
        }
        Ok(Self {
            client: FramingClient::new(transport, "\r"),
            rule,
            timeout: options.timeout,
            schema: SampleSchema::new(["Pressure(Pa)", "Emission"]),
        })
    }

    async fn query(&mut self, command: &str) -> MonitorResult<String> {
        self.client.query(command, &self.rule, self.timeout).await
    }

    /// Pressure in Pa as the gauge formats it. Empty if the reply had no marker.
    pub async fn read_pressure(&mut self) -> MonitorResult<String> {
        self.query(READ_PRESSURE).await
    }

    /// 1 while a filament is emitting, otherwise 0.
    pub async fn read_emission_status(&mut self) -> MonitorResult<i64> {
        Ok(i64::from(self.query(READ_EMISSION).await? == "01"))
    }

    /// Switch emission off.
    pub async fn set_emission_off(&mut self) -> MonitorResult<()> {
        self.query(EMISSION_OFF).await.map(|_| ())
    }

    /// Switch emission on for `filament`.
    pub async fn set_emission_on(&mut self, filament: Filament) -> MonitorResult<()> {
        let command = match filament {
            Filament::One => FILAMENT_1_ON,
            Filament::Two => FILAMENT_2_ON,
        };
        self.query(command).await.map(|_| ())
    }
}

#[async_trait]
impl Instrument for IonGauge {
    fn schema(&self) -> &SampleSchema {
        &self.schema
    }

    async fn acquire(&mut self) -> MonitorResult<Vec<FieldValue>> {
        let pressure = self.read_pressure().await?;
        let emission = self.read_emission_status().await?;
        Ok(vec![FieldValue::Text(pressure), FieldValue::Int(emission)])
    }

    async fn close(&mut self) -> MonitorResult<()> {
        self.client.close().await
    }
}
