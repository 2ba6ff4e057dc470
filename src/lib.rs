//! # Lab Monitor Core Library
//!
//! This crate holds everything the `lab-monitor` binary needs to poll
//! laboratory instruments on a fixed cadence, keep a bounded live history of
//! their readings and persist every sample to yearly gzip-compressed CSV logs.
//!
//! ## Crate Structure
//!
//! - **`transport`**: Serial and TCP byte links behind the `Transport` trait.
//! - **`framing`**: Turns a command into a complete reply using a per-device
//!   `CompletionRule` (prompt, fixed-width stream, marker or line).
//! - **`instruments`**: DeepVNA, DL7, ion gauge and TC290 drivers on top of
//!   the framing client, all implementing `Instrument`.
//! - **`analysis`**: Notch search over a reflection sweep.
//! - **`scheduler`**: Fixed-interval polling that never overlaps itself.
//! - **`data`**: Samples, the in-memory history cache and the durable log.
//! - **`monitor`**: Wires one instrument to the scheduler, history and log.
//! - **`config`**: Figment-based TOML + environment configuration.
//! - **`logging`**: tracing-subscriber setup.
//! - **`error`**: The crate-wide `MonitorError`.

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod framing;
pub mod instruments;
pub mod logging;
pub mod monitor;
pub mod scheduler;
pub mod transport;

pub use config::MonitorConfig;
pub use error::{MonitorError, MonitorResult};
pub use instruments::Instrument;
pub use transport::Transport;
