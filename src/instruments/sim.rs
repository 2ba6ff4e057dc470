//! Scripted device peers for driver tests.

use crate::transport::StreamTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Commands received by a simulated device, terminator stripped.
pub(crate) type CommandLog = Arc<Mutex<Vec<String>>>;

/// Spawn a device that answers every `terminator`-delimited command with
/// `respond(command)`. Returns the host-side transport and the command log.
pub(crate) fn spawn_device<F>(terminator: &'static str, mut respond: F) -> (StreamTransport<DuplexStream>, CommandLog)
where
    F: FnMut(&str) -> Vec<u8> + Send + 'static,
{
    let (host, mut device) = tokio::io::duplex(64 * 1024);
    let log: CommandLog = Arc::default();
    let seen = Arc::clone(&log);

    tokio::spawn(async move {
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = match device.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            pending.extend_from_slice(&chunk[..n]);

            let needle = terminator.as_bytes();
            while let Some(pos) = pending.windows(needle.len()).position(|w| w == needle) {
                let command = String::from_utf8_lossy(&pending[..pos]).to_string();
                pending.drain(..pos + needle.len());
                seen.lock().push(command.clone());

                let reply = respond(&command);
                if !reply.is_empty() && device.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    });

    (StreamTransport::new(host, "sim"), log)
}
