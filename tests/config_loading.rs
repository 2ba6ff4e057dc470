//! The shipped configuration must load, validate and decode for every driver.

use lab_monitor::config::{InstrumentKind, MonitorConfig};
use lab_monitor::framing::CompletionRule;
use lab_monitor::instruments::deepvna::DeepVnaSettings;
use lab_monitor::instruments::dl7::{Dl7Settings, DEFAULT_PORT};
use lab_monitor::instruments::tc290::Tc290Settings;
use lab_monitor::monitor::MonitorPlan;
use lab_monitor::transport::TransportAddress;
use std::path::PathBuf;
use std::time::Duration;

fn shipped_config() -> MonitorConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/monitor.toml");
    MonitorConfig::load_from(&path).expect("load shipped config")
}

#[test]
fn test_shipped_config_is_valid() {
    let config = shipped_config();
    config.validate().expect("shipped config validates");

    let kinds: Vec<InstrumentKind> = config.instruments.iter().map(|i| i.kind).collect();
    assert_eq!(
        kinds,
        [
            InstrumentKind::DeepVna,
            InstrumentKind::Dl7,
            InstrumentKind::IonGauge,
            InstrumentKind::Tc290
        ]
    );
}

#[test]
fn test_driver_settings_decode() {
    let config = shipped_config();

    let vna: DeepVnaSettings = config
        .instrument("DeepVNA")
        .unwrap()
        .settings
        .clone()
        .try_into()
        .expect("deepvna settings");
    assert_eq!(vna.points, 301);
    assert_eq!(vna.center_hz, 41.96e6);

    let dl7 = config.instrument("DL7").unwrap();
    let settings: Dl7Settings = dl7.settings.clone().try_into().expect("dl7 settings");
    assert_eq!(settings.settle_secs, 1.0);
    assert!(matches!(
        dl7.transport,
        TransportAddress::Tcp { port, .. } if port == DEFAULT_PORT
    ));
    assert_eq!(
        dl7.framing,
        Some(CompletionRule::FixedWidthStreaming {
            terminator: '\r',
            record_width: 13,
            unit_suffix: Some("Pa".into()),
        })
    );

    let tc: Tc290Settings = config
        .instrument("TC290")
        .unwrap()
        .settings
        .clone()
        .try_into()
        .expect("tc290 settings");
    assert_eq!(tc.outputs, vec![1, 2]);
}

#[test]
fn test_plans_follow_instrument_settings() {
    let config = shipped_config();
    let gauge = config.instrument("IonGauge").unwrap();
    let plan = MonitorPlan::from_config(&config, gauge);

    assert_eq!(plan.id, "IonGauge");
    assert_eq!(plan.scheduler.interval, Duration::from_secs(1));
    assert!(plan.scheduler.align_to_second);
    assert_eq!(plan.history_capacity, 600);
    assert_eq!(
        plan.storage,
        Some((PathBuf::from("."), "Cryostat".to_string()))
    );
}
