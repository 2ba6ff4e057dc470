//! TCP socket links.

use super::StreamTransport;
use crate::error::{MonitorError, MonitorResult};
use std::time::Duration;
use tokio::net::TcpStream;

/// A TCP transport.
pub type TcpTransport = StreamTransport<TcpStream>;

/// Connect to `host:port`, giving up after `connect_timeout`.
pub async fn open_tcp(host: &str, port: u16, connect_timeout: Duration) -> MonitorResult<TcpTransport> {
    let endpoint = format!("{host}:{port}");
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&endpoint))
        .await
        .map_err(|_| {
            MonitorError::Connection(format!(
                "connect to {endpoint} timed out after {connect_timeout:?}"
            ))
        })?
        .map_err(|e| MonitorError::Connection(format!("connect to {endpoint} failed: {e}")))?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(endpoint = %endpoint, error = %e, "set_nodelay failed");
    }
    tracing::info!(endpoint = %endpoint, "tcp connection established");
    Ok(StreamTransport::new(stream, format!("tcp:{endpoint}")))
}
