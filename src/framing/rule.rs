//! Completion rules: when a reply is complete, and what its payload is.
//!
//! Everything here is pure byte/string logic with no I/O, so each rule can be
//! tested against literal device output.

use crate::error::{MonitorError, MonitorResult};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

/// Value returned by [`CompletionRule::FixedWidthStreaming`] when bytes
/// arrived but no complete record could be taken from them.
pub const STREAM_SENTINEL: &str = "0";

fn default_prompt() -> String {
    "ch> ".to_string()
}

fn default_record_terminator() -> char {
    '\r'
}

fn default_record_width() -> usize {
    13
}

fn default_unit_suffix() -> Option<String> {
    Some("Pa".to_string())
}

fn default_marker() -> char {
    '>'
}

fn default_cr() -> char {
    '\r'
}

fn default_lf() -> char {
    '\n'
}

/// How a reply on the stream is delimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CompletionRule {
    /// The reply ends with a prompt; the device echoes the command first.
    PromptTerminated {
        /// Prompt marker, e.g. `ch> `.
        #[serde(default = "default_prompt")]
        prompt: String,
    },
    /// An unsolicited stream of fixed-width records; only the newest counts.
    FixedWidthStreaming {
        /// Record terminator byte.
        #[serde(default = "default_record_terminator")]
        terminator: char,
        /// Record width in bytes, excluding the terminator.
        #[serde(default = "default_record_width")]
        record_width: usize,
        /// Unit text stripped from the end of a record.
        #[serde(default = "default_unit_suffix")]
        unit_suffix: Option<String>,
    },
    /// A single line; the payload is the token after a marker character.
    MarkerExtracted {
        /// Marker preceding the payload token.
        #[serde(default = "default_marker")]
        marker: char,
        /// Line terminator.
        #[serde(default = "default_cr")]
        line_terminator: char,
    },
    /// A single line; the payload is the trimmed line.
    LineTerminated {
        /// Line terminator.
        #[serde(default = "default_lf")]
        line_terminator: char,
    },
}

/// Result of taking the newest record from a streaming buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A full record was found; the buffer was consumed through its terminator.
    Record(String),
    /// There is no terminator in the buffer; nothing was consumed.
    NoTerminator,
    /// A terminator was found but the record before it was too short. The
    /// buffer was still consumed through the terminator.
    Malformed(String),
}

impl CompletionRule {
    /// The DeepVNA shell prompt rule.
    pub fn prompt() -> Self {
        CompletionRule::PromptTerminated {
            prompt: default_prompt(),
        }
    }

    /// The DL7 record stream rule: 13-byte records ending `Pa`, CR-terminated.
    pub fn fixed_width() -> Self {
        CompletionRule::FixedWidthStreaming {
            terminator: default_record_terminator(),
            record_width: default_record_width(),
            unit_suffix: default_unit_suffix(),
        }
    }

    /// The ion gauge `>`-marker rule.
    pub fn marker() -> Self {
        CompletionRule::MarkerExtracted {
            marker: default_marker(),
            line_terminator: default_cr(),
        }
    }

    /// Plain newline-terminated replies.
    pub fn line() -> Self {
        CompletionRule::LineTerminated {
            line_terminator: default_lf(),
        }
    }

    /// Whether the rule reads an unsolicited stream with carried-over state.
    pub fn is_streaming(&self) -> bool {
        matches!(self, CompletionRule::FixedWidthStreaming { .. })
    }

    /// Reject parameter combinations that could never complete.
    pub fn validate(&self) -> MonitorResult<()> {
        let bad = |msg: &str| Err(MonitorError::Configuration(msg.to_string()));
        match self {
            CompletionRule::PromptTerminated { prompt } if prompt.is_empty() => {
                bad("prompt_terminated needs a non-empty prompt")
            }
            CompletionRule::FixedWidthStreaming {
                terminator,
                record_width,
                ..
            } => {
                if *record_width == 0 {
                    bad("fixed_width_streaming needs record_width > 0")
                } else if !terminator.is_ascii() {
                    bad("fixed_width_streaming terminator must be a single ASCII byte")
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Completion predicate over the bytes accumulated so far.
    pub fn is_complete(&self, buffer: &[u8]) -> bool {
        match self {
            CompletionRule::PromptTerminated { prompt } => buffer.ends_with(prompt.as_bytes()),
            CompletionRule::FixedWidthStreaming { terminator, .. } => {
                buffer.contains(&(*terminator as u8))
            }
            CompletionRule::MarkerExtracted {
                line_terminator, ..
            }
            | CompletionRule::LineTerminated { line_terminator } => {
                let mut encoded = [0u8; 4];
                let needle = line_terminator.encode_utf8(&mut encoded).as_bytes();
                buffer.windows(needle.len()).any(|w| w == needle)
            }
        }
    }

    /// Turn a complete request/response frame into its payload.
    ///
    /// Streaming rules carry state between calls and go through
    /// [`take_latest_record`] instead; calling this with one is an error.
    pub fn extract(&self, command: &str, frame: &[u8]) -> MonitorResult<String> {
        let text = String::from_utf8_lossy(frame);
        match self {
            CompletionRule::PromptTerminated { prompt } => {
                let echo = format!("{command}\r\n");
                Ok(text.replace(&echo, "").replace(prompt.as_str(), ""))
            }
            CompletionRule::MarkerExtracted {
                marker,
                line_terminator,
            } => Ok(marker_token(&text, *marker, *line_terminator).unwrap_or_default()),
            CompletionRule::LineTerminated { line_terminator } => {
                let line = text.split(*line_terminator).next().unwrap_or_default();
                Ok(line.trim().to_string())
            }
            CompletionRule::FixedWidthStreaming { .. } => Err(MonitorError::MalformedResponse(
                "fixed-width streams are read through the residual buffer".into(),
            )),
        }
    }
}

/// First non-whitespace token that follows `marker` and runs up to
/// `line_terminator`.
fn marker_token(text: &str, marker: char, line_terminator: char) -> Option<String> {
    text.match_indices(marker).find_map(|(at, _)| {
        let rest = &text[at + marker.len_utf8()..];
        let end = rest.find(|c: char| c == line_terminator || c.is_whitespace())?;
        (end > 0 && rest[end..].starts_with(line_terminator)).then(|| rest[..end].to_string())
    })
}

/// Take the newest record from `residual`.
///
/// Finds the last terminator, decodes the `record_width` bytes immediately
/// before it, and drains the buffer through that terminator so only the
/// trailing partial record stays behind.
pub fn take_latest_record(
    residual: &mut BytesMut,
    terminator: u8,
    record_width: usize,
    unit_suffix: Option<&str>,
) -> RecordOutcome {
    let Some(last) = residual.iter().rposition(|b| *b == terminator) else {
        return RecordOutcome::NoTerminator;
    };

    let outcome = if last < record_width {
        RecordOutcome::Malformed(format!(
            "record of {last} bytes is shorter than the expected {record_width}"
        ))
    } else {
        RecordOutcome::Record(decode_record(
            &residual[last - record_width..last],
            unit_suffix,
        ))
    };
    residual.advance(last + 1);
    outcome
}

fn decode_record(raw: &[u8], unit_suffix: Option<&str>) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = match unit_suffix {
        Some(suffix) => text.strip_suffix(suffix).unwrap_or(&text),
        None => &text,
    };
    trimmed.replace(' ', "")
}

/// Drop a leading partial record so the buffer starts at a record boundary.
///
/// A stream joined mid-record has its first terminator somewhere other than
/// `record_width`; everything through that terminator is discarded. Returns
/// the number of bytes dropped.
pub fn align_to_record(residual: &mut BytesMut, terminator: u8, record_width: usize) -> usize {
    match residual.iter().position(|b| *b == terminator) {
        Some(pos) if pos != record_width => {
            residual.advance(pos + 1);
            pos + 1
        }
        _ => 0,
    }
}
