//! Parsing and encoding of line-delimited JSON frames.

use serde::Deserialize;
use thiserror::Error;

use tabhub_core::Event;

use crate::message::{ControlFrame, HelloFrame, InboundFrame};

/// Maximum inbound frame size (512 KiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 512 * 1024;

/// Errors produced while decoding or encoding a frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has no type")]
    MissingType,

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Raw envelope as received on the wire.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Strips the line terminator and enforces the size limit on what remains.
fn frame_body(line: &str, max: usize) -> Result<&str, FrameError> {
    let body = line.trim_end_matches(['\r', '\n']);
    if body.len() > max {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max,
        });
    }
    Ok(body)
}

/// Parses one inbound line into a control or passthrough frame.
///
/// Trailing newline characters are ignored.
pub fn parse_frame(line: &str, max: usize) -> Result<InboundFrame, FrameError> {
    let body = frame_body(line, max)?;

    let raw: RawFrame =
        serde_json::from_str(body).map_err(|e| FrameError::Malformed(e.to_string()))?;

    let kind = match raw.kind {
        Some(kind) if !kind.is_empty() => kind,
        _ => return Err(FrameError::MissingType),
    };

    Ok(match ControlFrame::from_kind(&kind) {
        Some(control) => InboundFrame::Control(control),
        None => InboundFrame::Passthrough {
            kind,
            payload: raw.payload,
        },
    })
}

/// Parses the handshake line sent before a connection is handed to the hub.
pub fn parse_hello(line: &str, max: usize) -> Result<HelloFrame, FrameError> {
    let body = frame_body(line, max)?;
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| FrameError::Malformed(e.to_string()))?;

    match value.get("type").and_then(|v| v.as_str()) {
        Some("hello") => {}
        Some(other) => {
            return Err(FrameError::Malformed(format!(
                "expected hello frame, got '{other}'"
            )))
        }
        None => return Err(FrameError::MissingType),
    }

    serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))
}

/// Serializes an outbound event into a single line (without the newline).
pub fn encode_event(event: &Event) -> Result<String, FrameError> {
    event.to_json().map_err(|e| FrameError::Encode(e.to_string()))
}
