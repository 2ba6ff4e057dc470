//! Command/response framing over a raw [`Transport`].
//!
//! [`FramingClient`] is the one place where bytes become replies. Every
//! instrument driver owns exactly one client and picks a [`CompletionRule`]
//! per query; there are no per-instrument protocol classes.
//!
//! # Polling
//!
//! After a command is written the client reads in short slices, 1 ms for the
//! first read and 10 ms after that, until the rule says the reply is
//! complete or the deadline passes. A timed-out query returns
//! [`MonitorError::Timeout`] and never a partial payload.
//!
//! # Stale Input
//!
//! A reply that arrives after its query timed out is still in the read
//! buffer when the next query starts. Request/response queries discard
//! whatever is already buffered before writing, so a late reply is never
//! taken for the answer to the next command. Streaming queries instead
//! start by appending everything buffered to the residual.
//!
//! Queries are not cancel safe. The monitor never cancels an in-flight
//! query.

pub mod rule;

pub use rule::{CompletionRule, RecordOutcome, STREAM_SENTINEL};

use crate::error::{MonitorError, MonitorResult};
use crate::transport::Transport;
use bytes::BytesMut;
use std::time::Duration;
use tokio::time::Instant;

/// Delay before the first read after a write.
pub const FIRST_READ_DELAY: Duration = Duration::from_millis(1);

/// Delay between subsequent reads.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest single read.
pub const READ_CHUNK: usize = 1024;

/// Framed command/response client that owns its transport.
pub struct FramingClient {
    transport: Box<dyn Transport>,
    command_terminator: String,
    residual: BytesMut,
}

impl FramingClient {
    /// Create a client over `transport`, appending `command_terminator` to
    /// every command written.
    pub fn new(transport: Box<dyn Transport>, command_terminator: impl Into<String>) -> Self {
        Self {
            transport,
            command_terminator: command_terminator.into(),
            residual: BytesMut::new(),
        }
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        self.transport.describe()
    }

    /// Bytes carried over between streaming reads.
    pub fn residual(&self) -> &[u8] {
        &self.residual
    }

    /// Send `command` and wait for a reply completed under `rule`.
    ///
    /// For [`CompletionRule::FixedWidthStreaming`] an empty `command` writes
    /// nothing and only reads the unsolicited stream. Streaming reads end
    /// early as soon as a terminator is buffered; at the deadline they fail
    /// with [`MonitorError::Timeout`] if nothing at all arrived, and return
    /// [`STREAM_SENTINEL`] if bytes arrived without completing a record.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::Timeout`] if the reply is not complete in time
    /// - [`MonitorError::Connection`] if the transport fails
    pub async fn query(
        &mut self,
        command: &str,
        rule: &CompletionRule,
        timeout: Duration,
    ) -> MonitorResult<String> {
        let deadline = Instant::now() + timeout;
        if !rule.is_streaming() {
            self.discard_stale_input().await?;
        }
        if !(command.is_empty() && rule.is_streaming()) {
            self.write_command(command).await?;
        }

        match rule {
            CompletionRule::FixedWidthStreaming {
                terminator,
                record_width,
                unit_suffix,
            } => {
                self.read_stream(
                    command,
                    *terminator as u8,
                    *record_width,
                    unit_suffix.as_deref(),
                    deadline,
                    timeout,
                )
                .await
            }
            _ => {
                let frame = self.read_frame(command, rule, deadline, timeout).await?;
                rule.extract(command, &frame)
            }
        }
    }

    /// Write `command` plus the terminator without reading a reply.
    pub async fn send(&mut self, command: &str) -> MonitorResult<()> {
        self.write_command(command).await
    }

    /// Pulse a rising edge: write `low`, `high`, `low` back to back.
    ///
    /// No acknowledgment is read between steps. If the process dies between
    /// writes the device is left in whichever state the last write set.
    pub async fn rising_edge(&mut self, low: &str, high: &str) -> MonitorResult<()> {
        self.write_command(low).await?;
        self.write_command(high).await?;
        self.write_command(low).await
    }

    /// Align the carried-over stream to a record boundary.
    ///
    /// Waits `settle` for the device to start streaming, buffers what
    /// arrived, and drops a leading partial record.
    pub async fn align_stream(&mut self, rule: &CompletionRule, settle: Duration) -> MonitorResult<()> {
        let CompletionRule::FixedWidthStreaming {
            terminator,
            record_width,
            ..
        } = rule
        else {
            return Ok(());
        };

        tokio::time::sleep(settle).await;
        let chunk = self.transport.read(READ_CHUNK, Duration::ZERO).await?;
        self.residual.extend_from_slice(&chunk);
        let dropped = rule::align_to_record(&mut self.residual, *terminator as u8, *record_width);
        tracing::debug!(
            endpoint = self.transport.describe(),
            buffered = self.residual.len(),
            dropped,
            "stream aligned"
        );
        Ok(())
    }

    /// Close the transport. Idempotent.
    pub async fn close(&mut self) -> MonitorResult<()> {
        self.residual.clear();
        self.transport.close().await
    }

    /// Read everything already buffered without waiting.
    async fn read_available(&mut self) -> MonitorResult<BytesMut> {
        let mut pending = BytesMut::new();
        loop {
            let chunk = self.transport.read(READ_CHUNK, Duration::ZERO).await?;
            pending.extend_from_slice(&chunk);
            if chunk.len() < READ_CHUNK {
                return Ok(pending);
            }
        }
    }

    /// Drop a late reply to an earlier, timed-out query.
    async fn discard_stale_input(&mut self) -> MonitorResult<()> {
        let stale = self.read_available().await?;
        if !stale.is_empty() {
            tracing::debug!(
                endpoint = self.transport.describe(),
                bytes = stale.len(),
                data = %String::from_utf8_lossy(&stale).escape_default(),
                "discarded stale input"
            );
        }
        Ok(())
    }

    async fn write_command(&mut self, command: &str) -> MonitorResult<()> {
        let line = format!("{command}{}", self.command_terminator);
        tracing::trace!(
            endpoint = self.transport.describe(),
            command = %line.escape_default(),
            "sending command"
        );
        self.transport.write(line.as_bytes()).await
    }

    /// Next read slice, never past the deadline.
    fn slice(first: bool, deadline: Instant) -> Duration {
        let pause = if first { FIRST_READ_DELAY } else { POLL_INTERVAL };
        pause.min(deadline.saturating_duration_since(Instant::now()))
    }

    async fn read_frame(
        &mut self,
        command: &str,
        rule: &CompletionRule,
        deadline: Instant,
        timeout: Duration,
    ) -> MonitorResult<BytesMut> {
        let mut buffer = BytesMut::new();
        let mut first = true;
        loop {
            let chunk = self
                .transport
                .read(READ_CHUNK, Self::slice(first, deadline))
                .await?;
            first = false;
            buffer.extend_from_slice(&chunk);

            if rule.is_complete(&buffer) {
                tracing::trace!(
                    endpoint = self.transport.describe(),
                    reply = %String::from_utf8_lossy(&buffer).escape_default(),
                    "reply complete"
                );
                return Ok(buffer);
            }
            if Instant::now() >= deadline {
                return Err(MonitorError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
        }
    }

    async fn read_stream(
        &mut self,
        command: &str,
        terminator: u8,
        record_width: usize,
        unit_suffix: Option<&str>,
        deadline: Instant,
        timeout: Duration,
    ) -> MonitorResult<String> {
        let pending = self.read_available().await?;
        let mut fresh = pending.len();
        self.residual.extend_from_slice(&pending);
        let mut first = true;
        loop {
            if self.residual.contains(&terminator) {
                return Ok(
                    match rule::take_latest_record(&mut self.residual, terminator, record_width, unit_suffix) {
                        RecordOutcome::Record(value) => value,
                        RecordOutcome::Malformed(reason) => {
                            tracing::warn!(
                                endpoint = self.transport.describe(),
                                %reason,
                                "malformed stream record"
                            );
                            STREAM_SENTINEL.to_string()
                        }
                        RecordOutcome::NoTerminator => STREAM_SENTINEL.to_string(),
                    },
                );
            }
            if !first && Instant::now() >= deadline {
                if fresh == 0 {
                    return Err(MonitorError::Timeout {
                        command: command.to_string(),
                        timeout,
                    });
                }
                tracing::debug!(
                    endpoint = self.transport.describe(),
                    buffered = self.residual.len(),
                    "no complete record before deadline"
                );
                return Ok(STREAM_SENTINEL.to_string());
            }

            let chunk = self
                .transport
                .read(READ_CHUNK, Self::slice(first, deadline))
                .await?;
            first = false;
            fresh += chunk.len();
            self.residual.extend_from_slice(&chunk);
        }
    }
}
