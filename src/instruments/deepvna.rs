//! DeepVNA network analyzer driver
//!
//! Protocol Overview:
//! - Format: ASCII shell over USB-serial, 115200 baud
//! - Command terminator: CR (\r)
//! - Replies echo the command plus `\r\n`, then the payload, then the
//!   prompt `ch> `
//! - `frequencies` returns one frequency (Hz) per line
//! - `data 0` returns one `re im` reflection pair per line
//!
//! Each acquisition runs a single sweep (`resume`, wait, `pause`), reads the
//! S11 trace and reduces it with [`notch_search`] to the notch center, its
//! 3 dB edges, the curve maximum, the quality factor and the reflection depth.

use super::{DriverOptions, Instrument};
use crate::analysis::{notch_search, NotchResult, SweepCurve};
use crate::data::{FieldValue, SampleSchema};
use crate::error::{MonitorError, MonitorResult};
use crate::framing::{CompletionRule, FramingClient};
use crate::transport::Transport;
use async_trait::async_trait;
use num_complex::Complex64;
use serde::Deserialize;
use std::time::Duration;

/// Columns after `Time`.
pub const FIELDS: [&str; 10] = [
    "Center(Hz)",
    "S11Center(dB)",
    "CenterLeft3dB(Hz)",
    "S11CenterLeft3dB(dB)",
    "CenterRight3dB(Hz)",
    "S11CenterRight3dB(dB)",
    "FrqS11Max(Hz)",
    "S11Max(dB)",
    "QualityFactor(Unit)",
    "Reflect(dB)",
];

fn default_center_hz() -> f64 {
    41.96e6
}

fn default_span_hz() -> f64 {
    2e6
}

fn default_points() -> u32 {
    301
}

fn default_sampling_time_secs() -> f64 {
    2.0
}

/// Sweep settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeepVnaSettings {
    /// Sweep center in Hz.
    #[serde(default = "default_center_hz")]
    pub center_hz: f64,
    /// Sweep span in Hz.
    #[serde(default = "default_span_hz")]
    pub span_hz: f64,
    /// Points per sweep.
    #[serde(default = "default_points")]
    pub points: u32,
    /// How long the analyzer sweeps before it is paused and read.
    #[serde(default = "default_sampling_time_secs")]
    pub sampling_time_secs: f64,
}

impl Default for DeepVnaSettings {
    fn default() -> Self {
        Self {
            center_hz: default_center_hz(),
            span_hz: default_span_hz(),
            points: default_points(),
            sampling_time_secs: default_sampling_time_secs(),
        }
    }
}

impl DeepVnaSettings {
    fn validate(&self) -> MonitorResult<()> {
        let bad = |msg: String| Err(MonitorError::Configuration(msg));
        if !(self.span_hz.is_finite() && self.span_hz > 0.0) {
            return bad(format!("deepvna span_hz must be positive, got {}", self.span_hz));
        }
        if !(self.center_hz.is_finite() && self.center_hz - self.span_hz / 2.0 > 0.0) {
            return bad(format!(
                "deepvna sweep start {} Hz must be positive",
                self.center_hz - self.span_hz / 2.0
            ));
        }
        if self.points < 2 {
            return bad(format!("deepvna points must be at least 2, got {}", self.points));
        }
        if !(self.sampling_time_secs.is_finite() && self.sampling_time_secs >= 0.0) {
            return bad(format!(
                "deepvna sampling_time_secs must be non-negative, got {}",
                self.sampling_time_secs
            ));
        }
        Ok(())
    }

    fn sampling_time(&self) -> Duration {
        Duration::from_secs_f64(self.sampling_time_secs)
    }
}

/// Driver for the DeepVNA.
pub struct DeepVna {
    client: FramingClient,
    rule: CompletionRule,
    timeout: Duration,
    settings: DeepVnaSettings,
    schema: SampleSchema,
}

impl DeepVna {
    /// Configure traces and the sweep range over an open link.
    pub async fn connect(
        transport: Box<dyn Transport>,
        settings: DeepVnaSettings,
        options: DriverOptions,
    ) -> MonitorResult<Self> {
        settings.validate()?;
        let rule = options.rule_or(CompletionRule::prompt());
        if rule.is_streaming() {
            return Err(MonitorError::Configuration(
                "deepvna replies cannot be read as a record stream".into(),
            ));
        }

        let mut vna = Self {
            client: FramingClient::new(transport, "\r"),
            rule,
            timeout: options.timeout,
            settings,
            schema: SampleSchema::new(FIELDS),
        };
        vna.init_traces().await?;
        let DeepVnaSettings {
            center_hz,
            span_hz,
            points,
            ..
        } = vna.settings;
        vna.sweep(center_hz, span_hz, points).await?;
        Ok(vna)
    }

    async fn query(&mut self, command: &str) -> MonitorResult<String> {
        self.client.query(command, &self.rule, self.timeout).await
    }

    /// Show trace 0 as log magnitude and switch the others off.
    pub async fn init_traces(&mut self) -> MonitorResult<()> {
        for command in ["trace 0 logmag 0", "trace 1 off", "trace 2 off", "trace 3 off"] {
            self.query(command).await?;
        }
        Ok(())
    }

    /// Set the sweep to `center ± span/2` with `points` points.
    pub async fn sweep(&mut self, center_hz: f64, span_hz: f64, points: u32) -> MonitorResult<()> {
        let start = center_hz - span_hz / 2.0;
        let stop = center_hz + span_hz / 2.0;
        self.query(&format!("sweep {start:.0} {stop:.0} {points}")).await?;
        tracing::info!(start_hz = start, stop_hz = stop, points, "deepvna sweep configured");
        Ok(())
    }

    /// Let the analyzer sweep for the sampling time, then freeze the trace.
    pub async fn sweep_once(&mut self) -> MonitorResult<()> {
        self.query("resume").await?;
        tokio::time::sleep(self.settings.sampling_time()).await;
        self.query("pause").await?;
        Ok(())
    }

    /// Frequencies of the current sweep.
    pub async fn frequencies(&mut self) -> MonitorResult<Vec<f64>> {
        let reply = self.query("frequencies").await?;
        lines(&reply)
            .map(|line| parse_float("frequencies", line))
            .collect()
    }

    /// S11 reflection coefficients of the current sweep.
    pub async fn data0(&mut self) -> MonitorResult<Vec<Complex64>> {
        let reply = self.query("data 0").await?;
        lines(&reply)
            .map(|line| {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(re), Some(im), None) => Ok(Complex64::new(
                        parse_float("data 0", re)?,
                        parse_float("data 0", im)?,
                    )),
                    _ => Err(MonitorError::MalformedResponse(format!(
                        "'data 0' line {line:?} is not a 're im' pair"
                    ))),
                }
            })
            .collect()
    }

    /// One sweep reduced to its notch.
    pub async fn measure(&mut self) -> MonitorResult<NotchResult> {
        self.sweep_once().await?;
        let frequency = self.frequencies().await?;
        let data = self.data0().await?;
        let curve = SweepCurve::from_complex(frequency, &data)?;
        notch_search(&curve)
    }
}

fn lines(reply: &str) -> impl Iterator<Item = &str> {
    reply.split("\r\n").map(str::trim).filter(|l| !l.is_empty())
}

fn parse_float(command: &str, text: &str) -> MonitorResult<f64> {
    text.parse().map_err(|_| {
        MonitorError::MalformedResponse(format!("'{command}' returned non-numeric value {text:?}"))
    })
}

#[async_trait]
impl Instrument for DeepVna {
    fn schema(&self) -> &SampleSchema {
        &self.schema
    }

    async fn acquire(&mut self) -> MonitorResult<Vec<FieldValue>> {
        let notch = self.measure().await?;
        let quality = notch.quality_factor()?;
        Ok(vec![
            notch.center.frequency.into(),
            notch.center.magnitude.into(),
            notch.left_3db.frequency.into(),
            notch.left_3db.magnitude.into(),
            notch.right_3db.frequency.into(),
            notch.right_3db.magnitude.into(),
            notch.peak.frequency.into(),
            notch.peak.magnitude.into(),
            quality.into(),
            notch.reflection().into(),
        ])
    }

    /// Leave the analyzer sweeping continuously.
    async fn cleanup(&mut self) -> MonitorResult<()> {
        self.query("resume").await.map(|_| ())
    }

    async fn close(&mut self) -> MonitorResult<()> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::sim::{spawn_device, CommandLog};

    /// Reflection magnitudes with a notch at the middle point.
    const MAGNITUDES: [f64; 5] = [0.56, 0.4, 0.0316, 0.4, 0.5];
    const FREQUENCIES: [f64; 5] = [41.0e6, 41.5e6, 41.96e6, 42.5e6, 43.0e6];

    fn reply_for(command: &str) -> Vec<u8> {
        let body = match command {
            "frequencies" => FREQUENCIES.iter().map(|f| format!("{f}\r\n")).collect(),
            "data 0" => MAGNITUDES.iter().map(|m| format!("{m} 0.0\r\n")).collect(),
            _ => String::new(),
        };
        format!("{command}\r\n{body}ch> ").into_bytes()
    }

    async fn connected() -> (DeepVna, CommandLog) {
        let (link, log) = spawn_device("\r", reply_for);
        let settings = DeepVnaSettings {
            sampling_time_secs: 0.0,
            ..Default::default()
        };
        let vna = DeepVna::connect(Box::new(link), settings, DriverOptions::with_timeout(Duration::from_secs(1)))
            .await
            .unwrap();
        (vna, log)
    }

    #[tokio::test]
    async fn test_connect_configures_traces_and_sweep() {
        let (_vna, log) = connected().await;
        assert_eq!(
            *log.lock(),
            vec![
                "trace 0 logmag 0",
                "trace 1 off",
                "trace 2 off",
                "trace 3 off",
                "sweep 40960000 42960000 301",
            ]
        );
    }

    #[tokio::test]
    async fn test_acquire_reduces_sweep() {
        let (mut vna, log) = connected().await;
        let values = vna.acquire().await.unwrap();
        assert_eq!(values.len(), vna.schema().fields().len());

        let get = |i: usize| values[i].as_f64().unwrap();
        assert_eq!(get(0), 41.96e6);
        assert_eq!(get(2), 41.5e6);
        assert_eq!(get(4), 42.5e6);
        assert_eq!(get(6), 41.0e6);
        assert!((get(8) - 41.96).abs() < 1e-9);
        assert!(get(9) < -20.0);

        let sent = log.lock().clone();
        assert_eq!(&sent[5..], ["resume", "pause", "frequencies", "data 0"]);
    }

    #[tokio::test]
    async fn test_cleanup_resumes() {
        let (mut vna, log) = connected().await;
        vna.cleanup().await.unwrap();
        vna.close().await.unwrap();
        assert_eq!(log.lock().last().map(String::as_str), Some("resume"));
    }

    #[tokio::test]
    async fn test_bad_data_line_is_malformed() {
        let (link, _log) = spawn_device("\r", |command| {
            let body = if command == "data 0" { "0.5\r\n" } else { "" };
            format!("{command}\r\n{body}ch> ").into_bytes()
        });
        let mut vna = DeepVna::connect(
            Box::new(link),
            DeepVnaSettings::default(),
            DriverOptions::with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        let err = vna.data0().await.unwrap_err();
        assert!(matches!(err, MonitorError::MalformedResponse(_)));
    }

    #[test]
    fn test_settings_validation() {
        assert!(DeepVnaSettings::default().validate().is_ok());
        let settings = DeepVnaSettings {
            span_hz: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        let settings: DeepVnaSettings = toml::from_str("points = 101").unwrap();
        assert_eq!(settings.points, 101);
        assert_eq!(settings.center_hz, 41.96e6);
        assert!(toml::from_str::<DeepVnaSettings>("centre = 1.0").is_err());
    }
}
