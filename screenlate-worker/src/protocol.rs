//! Wire protocol
//!
//! One JSON object per line over stdio, in both directions. Pixel buffers
//! cross the pipe base64-encoded with an explicit `shape` and `dtype` so the
//! worker can reconstruct them without guessing. Unknown message types must
//! be ignored without closing the pipe, so incoming lines are parsed in two
//! steps: JSON first, then a match on the `type` field.

use crate::{Result, WorkerError};
use base64::Engine as _;
use screenlate_capture::{Frame, PixelFormat, Region};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent host -> worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// One-time configuration; the worker answers with `ready`
    Init { config: Value },

    /// One unit of work; the worker answers with `result` or `error`
    Process { data: Value },

    /// Ask the worker to exit cleanly
    Shutdown,
}

/// Messages sent worker -> host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Worker finished initializing
    Ready,

    /// Successful response to one `process`
    Result { data: Value },

    /// Failed response to one `process`
    Error { error: String },
}

impl HostMessage {
    /// Serialize to one newline-terminated JSON line
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| WorkerError::Protocol(format!("encode: {e}")))?;
        line.push('\n');
        Ok(line)
    }
}

impl WorkerMessage {
    /// Parse one line from a worker
    ///
    /// Returns `Ok(None)` for messages with an unknown `type`, which the
    /// protocol requires the host to skip. Malformed JSON is an error (it
    /// means the stream is out of sync and the worker must be restarted).
    pub fn parse_line(line: &str) -> Result<Option<WorkerMessage>> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| WorkerError::Protocol(format!("bad JSON from worker: {e}")))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        match kind.as_str() {
            "ready" | "result" | "error" => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| WorkerError::Protocol(format!("bad {kind} message: {e}"))),
            other => {
                tracing::debug!("Ignoring unknown worker message type '{}'", other);
                Ok(None)
            }
        }
    }

    /// Serialize to one newline-terminated JSON line (worker side)
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| WorkerError::Protocol(format!("encode: {e}")))?;
        line.push('\n');
        Ok(line)
    }
}

/// A pixel buffer on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImagePayload {
    /// Base64-encoded raw bytes, row-major
    pub data: String,

    /// `[height, width, channels]`
    pub shape: [u32; 3],

    /// Pixel format tag (`rgb8`, `rgba8`, `gray8`)
    pub dtype: String,
}

/// Encode a frame for transport
pub fn encode_frame(frame: &Frame) -> ImagePayload {
    ImagePayload {
        data: base64::engine::general_purpose::STANDARD.encode(&frame.pixels),
        shape: [frame.height, frame.width, frame.format.channels() as u32],
        dtype: frame.format.dtype_tag().to_string(),
    }
}

/// Reconstruct a frame from a payload
///
/// The region is supplied by the caller; a payload whose bytes do not match
/// its declared shape is a protocol error.
pub fn decode_frame(payload: &ImagePayload, region: Region) -> Result<Frame> {
    let format = PixelFormat::from_dtype_tag(&payload.dtype)
        .ok_or_else(|| WorkerError::Protocol(format!("unknown dtype '{}'", payload.dtype)))?;
    let pixels = base64::engine::general_purpose::STANDARD
        .decode(&payload.data)
        .map_err(|e| WorkerError::Protocol(format!("bad base64 image data: {e}")))?;
    let [height, width, channels] = payload.shape;
    if channels as usize != format.channels() {
        return Err(WorkerError::Protocol(format!(
            "shape channels {} disagree with dtype '{}'",
            channels, payload.dtype
        )));
    }
    Frame::new(pixels, width, height, format, region)
        .map_err(|e| WorkerError::Protocol(format!("image payload mismatch: {e}")))
}
