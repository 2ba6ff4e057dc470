//! End-to-end monitor runs against simulated devices.
//!
//! Each test connects a real driver to a scripted peer over a tokio duplex
//! pipe, runs the monitor for a few virtual seconds and inspects the log
//! files it leaves behind.

use flate2::read::MultiGzDecoder;
use lab_monitor::data::durable_log::STAGING_DIR;
use lab_monitor::instruments::ion_gauge::IonGauge;
use lab_monitor::instruments::DriverOptions;
use lab_monitor::monitor::{run_instrument, MonitorPlan};
use lab_monitor::scheduler::SchedulerConfig;
use lab_monitor::transport::StreamTransport;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Answer ion gauge commands. Every `fail_every`-th pressure request gets no
/// reply at all, so that query times out.
fn spawn_gauge(mut device: DuplexStream, fail_every: Option<usize>) -> Arc<AtomicUsize> {
    let pressure_requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pressure_requests);
    tokio::spawn(async move {
        let mut pending = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = match device.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            pending.extend_from_slice(&chunk[..n]);
            while let Some(pos) = pending.iter().position(|b| *b == b'\r') {
                let command: Vec<u8> = pending.drain(..=pos).collect();
                let reply: &[u8] = match &command[..command.len() - 1] {
                    b"#0002UHFIG1" => {
                        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        if fail_every.is_some_and(|k| n % k == 0) {
                            continue;
                        }
                        b"*01_>4.70E-08\r"
                    }
                    b"#0032UHFIG1" => b"*01_>01\r",
                    _ => b"*01_>?\r",
                };
                if device.write_all(reply).await.is_err() {
                    return;
                }
            }
        }
    });
    pressure_requests
}

fn plan(dir: &Path) -> MonitorPlan {
    MonitorPlan {
        id: "IonGauge".into(),
        scheduler: SchedulerConfig::every(Duration::from_secs(1)),
        history_capacity: 10,
        display_interval: Duration::from_secs(5),
        print_samples: false,
        storage: Some((dir.to_path_buf(), "Cryostat".into())),
    }
}

fn gauge(fail_every: Option<usize>) -> (IonGauge, Arc<AtomicUsize>) {
    let (host, device) = tokio::io::duplex(4096);
    let requests = spawn_gauge(device, fail_every);
    let link = StreamTransport::new(host, "ion-gauge-sim");
    let gauge = IonGauge::connect(
        Box::new(link),
        DriverOptions::with_timeout(Duration::from_millis(200)),
    )
    .expect("connect simulated gauge");
    (gauge, requests)
}

fn decode(path: &Path) -> String {
    let file = std::fs::File::open(path).expect("open log");
    let mut text = String::new();
    MultiGzDecoder::new(file)
        .read_to_string(&mut text)
        .expect("decode log");
    text
}

#[tokio::test(start_paused = true)]
async fn test_ion_gauge_run_writes_final_log() {
    let dir = tempfile::tempdir().unwrap();
    let (gauge, requests) = gauge(None);

    let summary = run_instrument(
        Box::new(gauge),
        plan(dir.path()),
        tokio::time::sleep(Duration::from_millis(2950)),
    )
    .await
    .expect("monitor run");

    assert_eq!(summary.stats.ticks, 3);
    assert_eq!(summary.stats.failures, 0);
    assert_eq!(requests.load(Ordering::SeqCst), 3);
    assert_eq!(summary.files.len(), 1);

    let final_file = &summary.files[0];
    let name = final_file.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("Cryostat__"));
    assert!(name.ends_with("__IonGauge.csv.gz"));
    assert!(dir.path().join(STAGING_DIR).join(&name).exists());

    let text = decode(final_file);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "Time,Pressure(Pa),Emission");
    for row in &lines[1..] {
        assert!(row.ends_with(",4.70E-08,1"), "unexpected row {row}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_polls_leave_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (gauge, _requests) = gauge(Some(2));

    let summary = run_instrument(
        Box::new(gauge),
        plan(dir.path()),
        tokio::time::sleep(Duration::from_millis(3950)),
    )
    .await
    .expect("monitor run");

    assert_eq!(summary.stats.ticks, 4);
    assert_eq!(summary.stats.failures, 2);

    let text = decode(&summary.files[0]);
    assert_eq!(text.lines().count(), 1 + 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_without_storage_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (gauge, _requests) = gauge(None);
    let mut plan = plan(dir.path());
    plan.storage = None;

    let summary = run_instrument(
        Box::new(gauge),
        plan,
        tokio::time::sleep(Duration::from_millis(1500)),
    )
    .await
    .expect("monitor run");

    assert_eq!(summary.stats.ticks, 2);
    assert!(summary.files.is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
