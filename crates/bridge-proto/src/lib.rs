//! Wire protocol shared between the capture client and the bridge.
//!
//! Keeping these types in a dedicated crate gives the server and any local
//! harnesses (the probe client, integration tests) a single source of truth
//! for the JSON schema without pulling in the server's runtime stack.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent from the capture client to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask the bridge to confirm the relay is up.
    StartSession,
    /// A captured frame, base64-encoded (optionally with a data-URI prefix).
    ScreenFrame { image_data: Option<String> },
    /// End-of-capture marker; the upstream session itself stays alive.
    StopSession,
}

/// Messages sent from the bridge back to capture clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionStarted { message: String },
    SessionStopped { message: String },
    /// One incremental fragment of the model's analysis, relayed as it streams.
    AnalysisResponse { text: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Legacy envelope still emitted by older capture clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyInput {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: String,
}

pub const DEFAULT_FRAME_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A decoded capture frame, immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Frame {
    /// Decode a base64 payload into a frame, stripping an optional
    /// `data:<mime>;base64,` prefix. The prefix's mime type wins when present;
    /// bare payloads default to JPEG, matching what capture clients send.
    pub fn from_base64(payload: &str) -> Result<Frame, FrameDecodeError> {
        let (mime_type, encoded) = split_data_uri(payload);
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(FrameDecodeError::Empty);
        }
        let data = STANDARD.decode(encoded)?;
        Ok(Frame {
            mime_type: mime_type.unwrap_or(DEFAULT_FRAME_MIME).to_string(),
            data,
        })
    }
}

/// Split `data:image/png;base64,AAAA` into (`image/png`, `AAAA`).
/// Payloads without a recognizable prefix pass through untouched.
fn split_data_uri(payload: &str) -> (Option<&str>, &str) {
    let Some(rest) = payload.strip_prefix("data:") else {
        return (None, payload);
    };
    match rest.split_once(";base64,") {
        Some((mime, encoded)) => {
            let mime = mime.trim();
            ((!mime.is_empty()).then_some(mime), encoded)
        }
        None => (None, payload),
    }
}
