//! CLI Entry Point for lab-monitor
//!
//! Provides command-line interface for:
//! - Monitoring one configured instrument until Ctrl+C
//! - Listing serial ports with their USB serial numbers
//! - Rebuilding a final log from its staging file after a crash
//!
//! # Usage
//!
//! Monitor the DeepVNA defined in the default config:
//! ```bash
//! lab-monitor run --instrument DeepVNA
//! ```
//!
//! Recompress a staging log left behind by a killed process:
//! ```bash
//! lab-monitor recompress --task Cryostat --subsystem DL7 --year 2024
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lab_monitor::config::{MonitorConfig, DEFAULT_CONFIG_PATH};
use lab_monitor::data::durable_log::{final_path, staging_path};
use lab_monitor::data::recompress_file;
use lab_monitor::transport::serial::list_ports;
use lab_monitor::{logging, monitor};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lab-monitor")]
#[command(about = "Periodic instrument monitor with compressed CSV logging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll one instrument until Ctrl+C
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Instrument id from the configuration
        #[arg(long)]
        instrument: String,
    },

    /// List serial ports
    Ports,

    /// Rebuild the final log of one subsystem and year from its staging file
    Recompress {
        /// Storage root
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Task name
        #[arg(long)]
        task: String,

        /// Subsystem (instrument id)
        #[arg(long)]
        subsystem: String,

        /// Year of the log
        #[arg(long)]
        year: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, instrument } => run_monitor(config, &instrument).await,
        Commands::Ports => print_ports(),
        Commands::Recompress {
            path,
            task,
            subsystem,
            year,
        } => recompress(path, &task, &subsystem, year),
    }
}

async fn run_monitor(config_path: PathBuf, instrument: &str) -> Result<()> {
    let config = MonitorConfig::load_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.validate().context("invalid configuration")?;
    logging::init_from_config(&config).context("failed to initialize logging")?;

    tracing::info!(
        application = %config.application.name,
        instrument,
        "starting monitor"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C, stopping");
        }
    };
    let summary = monitor::run(&config, instrument, shutdown).await?;

    println!(
        "{instrument}: {} ticks, {} failed, {} skipped",
        summary.stats.ticks, summary.stats.failures, summary.stats.skipped
    );
    for file in &summary.files {
        println!("   wrote {}", file.display());
    }
    Ok(())
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        println!(
            "{:<20} serial={:<20} {}",
            port.name,
            port.serial_number.as_deref().unwrap_or("-"),
            port.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn recompress(path: PathBuf, task: &str, subsystem: &str, year: i32) -> Result<()> {
    let staging = staging_path(&path, task, year, subsystem);
    let target = final_path(&path, task, year, subsystem);
    recompress_file(&staging, &target)
        .with_context(|| format!("failed to recompress {}", staging.display()))?;
    println!("wrote {}", target.display());
    Ok(())
}
