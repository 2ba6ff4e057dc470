//! TC290 temperature controller driver
//!
//! Protocol Overview:
//! - RS-232 over USB, 115200 baud
//! - Command terminator: CR LF (\r\n)
//! - One reply line per query, fields separated by commas
//! - `KRDG?` returns all ten inputs in kelvin: A, B, C1, D1 .. C4, D4
//! - Per output channel n: `SETP? n`, `OUTMODE? n` (mode, input channel,
//!   start at boot, reserved), `RANGE? n`, `PID? n`, `HTR? n`
//!
//! Values are persisted exactly as the controller formats them.

use super::{split_fields, DriverOptions, Instrument};
use crate::data::{FieldValue, SampleSchema};
use crate::error::{MonitorError, MonitorResult};
use crate::framing::{CompletionRule, FramingClient};
use crate::transport::Transport;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Temperature inputs in `KRDG?` order.
pub const INPUTS: [&str; 10] = ["A", "B", "C1", "D1", "C2", "D2", "C3", "D3", "C4", "D4"];

fn default_outputs() -> Vec<u8> {
    vec![1, 2]
}

/// TC290 settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tc290Settings {
    /// Output channels to record, each 1 or 2.
    #[serde(default = "default_outputs")]
    pub outputs: Vec<u8>,
}

impl Default for Tc290Settings {
    fn default() -> Self {
        Self {
            outputs: default_outputs(),
        }
    }
}

impl Tc290Settings {
    fn validate(&self) -> MonitorResult<()> {
        if self.outputs.is_empty() {
            return Err(MonitorError::Configuration("tc290 needs at least one output".into()));
        }
        if let Some(bad) = self.outputs.iter().find(|n| !matches!(n, 1 | 2)) {
            return Err(MonitorError::Configuration(format!(
                "tc290 output {bad} does not exist; outputs are 1 and 2"
            )));
        }
        Ok(())
    }
}

/// Column names for the given outputs.
pub fn schema_for(outputs: &[u8]) -> SampleSchema {
    let inputs = INPUTS.iter().map(|name| format!("{name}(K)"));
    let per_output = outputs.iter().flat_map(|n| {
        [
            format!("LP{n}_SET_VALUE(K)"),
            format!("MODE{n}"),
            format!("INPUT_CHANNEL{n}"),
            format!("RANGE{n}"),
            format!("P{n}"),
            format!("I{n}"),
            format!("D{n}"),
            format!("HEATER{n}(%)"),
        ]
    });
    SampleSchema::new(inputs.chain(per_output).collect::<Vec<_>>())
}

/// Output mode reported by `OUTMODE?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMode {
    /// 0-5: off, PID, zone, manual, monitor, warm-up
    pub mode: String,
    /// Controlling input channel, 1-10 for A-D4
    pub input_channel: String,
    /// 0 or 1
    pub start_at_boot: String,
}

/// Driver for the TC290.
pub struct Tc290 {
    client: FramingClient,
    rule: CompletionRule,
    timeout: Duration,
    outputs: Vec<u8>,
    schema: SampleSchema,
}

impl Tc290 {
    /// Wrap an open link.
    pub fn connect(
        transport: Box<dyn Transport>,
        settings: Tc290Settings,
        options: DriverOptions,
    ) -> MonitorResult<Self> {
        settings.validate()?;
        let rule = options.rule_or(CompletionRule::line());
        if rule.is_streaming() {
            return Err(MonitorError::Configuration(
                "tc290 replies cannot be read as a record stream".into(),
            ));
        }
        Ok(Self {
            client: FramingClient::new(transport, "\r\n"),
            rule,
            timeout: options.timeout,
            schema: schema_for(&settings.outputs),
            outputs: settings.outputs,
        })
    }

    async fn query(&mut self, command: &str) -> MonitorResult<String> {
        self.client.query(command, &self.rule, self.timeout).await
    }

    async fn query_fields(&mut self, command: &str, expected: usize) -> MonitorResult<Vec<String>> {
        let reply = self.query(command).await?;
        split_fields(command, &reply, expected)
    }

    /// Identification string.
    pub async fn idn(&mut self) -> MonitorResult<String> {
        self.query("*IDN?").await
    }

    /// All ten input temperatures in kelvin.
    pub async fn kelvin_readings(&mut self) -> MonitorResult<Vec<String>> {
        self.query_fields("KRDG?", INPUTS.len()).await
    }

    /// Control loop setpoint of `output`.
    pub async fn setpoint(&mut self, output: u8) -> MonitorResult<String> {
        self.query(&format!("SETP? {output}")).await
    }

    /// Output mode of `output`.
    pub async fn output_mode(&mut self, output: u8) -> MonitorResult<OutputMode> {
        let mut fields = self.query_fields(&format!("OUTMODE? {output}"), 4).await?.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        Ok(OutputMode {
            mode: next(),
            input_channel: next(),
            start_at_boot: next(),
        })
    }

    /// Heater range of `output`, 0-3 for off, low, medium, high.
    pub async fn range(&mut self, output: u8) -> MonitorResult<String> {
        self.query(&format!("RANGE? {output}")).await
    }

    /// P, I and D of `output`.
    pub async fn pid(&mut self, output: u8) -> MonitorResult<Vec<String>> {
        self.query_fields(&format!("PID? {output}"), 3).await
    }

    /// Heater output of `output` in percent.
    pub async fn heater_output(&mut self, output: u8) -> MonitorResult<String> {
        self.query(&format!("HTR? {output}")).await
    }
}

#[async_trait]
impl Instrument for Tc290 {
    fn schema(&self) -> &SampleSchema {
        &self.schema
    }

    async fn acquire(&mut self) -> MonitorResult<Vec<FieldValue>> {
        let mut values: Vec<FieldValue> = self
            .kelvin_readings()
            .await?
            .into_iter()
            .map(FieldValue::Text)
            .collect();

        for output in self.outputs.clone() {
            let setpoint = self.setpoint(output).await?;
            let mode = self.output_mode(output).await?;
            let range = self.range(output).await?;
            let pid = self.pid(output).await?;
            let heater = self.heater_output(output).await?;

            values.push(setpoint.into());
            values.push(mode.mode.into());
            values.push(mode.input_channel.into());
            values.push(range.into());
            values.extend(pid.into_iter().map(FieldValue::Text));
            values.push(heater.into());
        }
        Ok(values)
    }

    async fn close(&mut self) -> MonitorResult<()> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::sim::{spawn_device, CommandLog};

    fn reply(command: &str) -> Vec<u8> {
        let body = match command {
            "KRDG?" => "+293.1,+4.2,0,0,0,0,0,0,0,+77.3".to_string(),
            c if c.starts_with("SETP?") => "+300.0".into(),
            c if c.starts_with("OUTMODE?") => "1,2,0,0".into(),
            c if c.starts_with("RANGE?") => "3".into(),
            c if c.starts_with("PID?") => "50.0,20.0,0.0".into(),
            c if c.starts_with("HTR?") => format!("{}.5", &c[c.len() - 1..]),
            _ => "LakeShore,TC290,0,1.0".into(),
        };
        format!("{body}\r\n").into_bytes()
    }

    fn controller(settings: Tc290Settings) -> (Tc290, CommandLog) {
        let (link, log) = spawn_device("\r\n", reply);
        let tc = Tc290::connect(Box::new(link), settings, DriverOptions::with_timeout(Duration::from_millis(500))).unwrap();
        (tc, log)
    }

    #[test]
    fn test_schema_columns() {
        let schema = schema_for(&[1, 2]);
        assert_eq!(schema.fields().len(), 10 + 2 * 8);
        assert_eq!(schema.fields()[0], "A(K)");
        assert_eq!(schema.fields()[9], "D4(K)");
        assert_eq!(schema.fields()[10], "LP1_SET_VALUE(K)");
        assert_eq!(schema.fields()[25], "HEATER2(%)");
    }

    #[tokio::test]
    async fn test_acquire_row() {
        let (mut tc, log) = controller(Tc290Settings::default());
        let values = tc.acquire().await.unwrap();
        assert_eq!(values.len(), tc.schema().fields().len());
        assert_eq!(values[0], FieldValue::Text("+293.1".into()));
        assert_eq!(values[10], FieldValue::Text("+300.0".into()));
        assert_eq!(values[11], FieldValue::Text("1".into()));
        assert_eq!(values[12], FieldValue::Text("2".into()));
        assert_eq!(values[17], FieldValue::Text("1.5".into()));
        assert_eq!(values[25], FieldValue::Text("2.5".into()));

        let sent = log.lock().clone();
        assert_eq!(
            &sent[..7],
            ["KRDG?", "SETP? 1", "OUTMODE? 1", "RANGE? 1", "PID? 1", "HTR? 1", "SETP? 2"]
        );
    }

    #[tokio::test]
    async fn test_short_reading_is_malformed() {
        let (link, _log) = spawn_device("\r\n", |_| b"+293.1,+4.2\r\n".to_vec());
        let mut tc = Tc290::connect(
            Box::new(link),
            Tc290Settings { outputs: vec![1] },
            DriverOptions::with_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        let err = tc.acquire().await.unwrap_err();
        assert!(matches!(err, MonitorError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_idn() {
        let (mut tc, _log) = controller(Tc290Settings { outputs: vec![2] });
        assert_eq!(tc.idn().await.unwrap(), "LakeShore,TC290,0,1.0");
        assert_eq!(tc.schema().fields()[10], "LP2_SET_VALUE(K)");
    }

    #[test]
    fn test_settings_validation() {
        assert!(Tc290Settings { outputs: vec![] }.validate().is_err());
        assert!(Tc290Settings { outputs: vec![3] }.validate().is_err());
        assert!(Tc290Settings::default().validate().is_ok());
    }
}
