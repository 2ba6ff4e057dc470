//! Byte-stream transports for instrument links.
//!
//! A [`Transport`] is a raw, unframed byte pipe to one device: a serial port,
//! a TCP socket, or (in tests) one end of a `tokio::io::duplex` pair. It knows
//! nothing about commands or replies; framing lives in [`crate::framing`].
//!
//! # Types
//!
//! - [`Transport`]: the async trait every link implements
//! - [`StreamTransport`]: the one implementation, generic over any
//!   [`StreamIO`] stream
//! - [`TransportAddress`]: configuration-level description of where a
//!   device lives
//!
//! # Example
//!
//! ```rust,ignore
//! use lab_monitor::transport::{self, TransportAddress};
//!
//! let address = TransportAddress::Tcp {
//!     host: "192.168.30.131".into(),
//!     port: 8234,
//!     connect_timeout_ms: 3000,
//! };
//! let mut link = transport::open(&address).await?;
//! let bytes = link.read(256, Duration::from_millis(10)).await?;
//! link.close().await?;
//! ```

pub mod serial;
pub mod tcp;

use crate::error::{MonitorError, MonitorResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// =============================================================================
// Stream Trait
// =============================================================================

/// Trait alias for async byte streams a transport can wrap.
///
/// Covers `tokio_serial::SerialStream`, `tokio::net::TcpStream` and
/// `tokio::io::DuplexStream`.
pub trait StreamIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamIO for T {}

// =============================================================================
// Transport
// =============================================================================

/// A raw byte link to one device.
///
/// # Contract
/// - `read` returns whatever is available within `wait`, possibly nothing.
///   A zero `wait` never blocks.
/// - `write` sends the whole buffer or fails.
/// - `close` is idempotent. Any I/O after close fails with
///   [`MonitorError::Connection`].
#[async_trait]
pub trait Transport: Send {
    /// Read up to `max_bytes`, waiting at most `wait` for the first byte.
    async fn read(&mut self, max_bytes: usize, wait: Duration) -> MonitorResult<Vec<u8>>;

    /// Write all of `bytes` and flush.
    async fn write(&mut self, bytes: &[u8]) -> MonitorResult<()>;

    /// Release the underlying handle.
    async fn close(&mut self) -> MonitorResult<()>;

    /// Whether `close` has not been called yet.
    fn is_open(&self) -> bool;

    /// Human-readable endpoint name for logs.
    fn describe(&self) -> &str;
}

/// [`Transport`] over any async stream.
///
/// Dropping the transport drops the stream, which releases the OS handle, so
/// the link is closed on every exit path even when `close` is never reached.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: Option<S>,
    label: String,
}

impl<S: StreamIO> StreamTransport<S> {
    /// Wrap an already-open stream.
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            label: label.into(),
        }
    }

    fn stream_mut(&mut self) -> MonitorResult<&mut S> {
        let label = &self.label;
        self.stream
            .as_mut()
            .ok_or_else(|| MonitorError::Connection(format!("{label} is closed")))
    }
}

#[async_trait]
impl<S: StreamIO> Transport for StreamTransport<S> {
    async fn read(&mut self, max_bytes: usize, wait: Duration) -> MonitorResult<Vec<u8>> {
        let label = self.label.clone();
        let stream = self.stream_mut()?;
        if max_bytes == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; max_bytes];
        // `timeout` polls the read before the deadline, so a zero wait still
        // picks up bytes that are already buffered.
        match tokio::time::timeout(wait, stream.read(&mut buf)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(MonitorError::Connection(format!(
                "{label} closed by peer"
            ))),
            Ok(Ok(n)) => {
                buf.truncate(n);
                tracing::trace!(endpoint = %label, bytes = n, "read");
                Ok(buf)
            }
            Ok(Err(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(Vec::new())
            }
            Ok(Err(e)) => Err(MonitorError::Connection(format!("{label} read failed: {e}"))),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> MonitorResult<()> {
        let label = self.label.clone();
        let stream = self.stream_mut()?;
        stream
            .write_all(bytes)
            .await
            .map_err(|e| MonitorError::Connection(format!("{label} write failed: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| MonitorError::Connection(format!("{label} flush failed: {e}")))?;
        tracing::trace!(endpoint = %label, data = %String::from_utf8_lossy(bytes).escape_default(), "wrote");
        Ok(())
    }

    async fn close(&mut self) -> MonitorResult<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                // The handle is released on drop regardless.
                tracing::debug!(endpoint = %self.label, error = %e, "shutdown on close failed");
            }
            tracing::debug!(endpoint = %self.label, "transport closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> &str {
        &self.label
    }
}

// =============================================================================
// Addresses
// =============================================================================

fn default_baud_rate() -> u32 {
    9600
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

/// Where a device lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportAddress {
    /// RS-232 / USB-serial device, by port path or by USB serial number.
    Serial {
        /// Port path, e.g. `/dev/ttyUSB0` or `COM3`.
        #[serde(default)]
        port: Option<String>,
        /// USB serial number; resolved to a port at open time.
        #[serde(default)]
        serial_number: Option<String>,
        /// Line speed.
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// TCP socket.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// TCP port.
        port: u16,
        /// Connect timeout in milliseconds.
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
    },
}

impl TransportAddress {
    /// Check that the address names a device at all.
    pub fn validate(&self) -> MonitorResult<()> {
        match self {
            TransportAddress::Serial {
                port: None,
                serial_number: None,
                ..
            } => Err(MonitorError::Configuration(
                "serial transport needs either `port` or `serial_number`".into(),
            )),
            TransportAddress::Tcp { host, .. } if host.trim().is_empty() => Err(
                MonitorError::Configuration("tcp transport needs a host".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Open the device at `address`.
///
/// # Errors
///
/// Returns [`MonitorError::Connection`] if the device cannot be opened.
pub async fn open(address: &TransportAddress) -> MonitorResult<Box<dyn Transport>> {
    address.validate()?;
    match address {
        TransportAddress::Serial {
            port,
            serial_number,
            baud_rate,
        } => {
            let path = match (port, serial_number) {
                (Some(port), _) => port.clone(),
                (None, Some(serial_number)) => serial::find_port_by_serial_number(serial_number)?,
                (None, None) => {
                    return Err(MonitorError::Configuration(
                        "serial transport needs either `port` or `serial_number`".into(),
                    ))
                }
            };
            let transport = serial::open_serial(&path, *baud_rate).await?;
            Ok(Box::new(transport))
        }
        TransportAddress::Tcp {
            host,
            port,
            connect_timeout_ms,
        } => {
            let transport =
                tcp::open_tcp(host, *port, Duration::from_millis(*connect_timeout_ms)).await?;
            Ok(Box::new(transport))
        }
    }
}
