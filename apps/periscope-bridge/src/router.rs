//! Classifies inbound client messages and dispatches them.
//!
//! Every message yields at most one direct reply; accepted frames produce
//! none (their responses arrive later via broadcast). Errors local to one
//! message never escape this module.

use bridge_proto::{Frame, RealtimeInput, ServerMessage};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::queue::FrameSender;

pub fn route_message(raw: &str, client_id: &str, frames: &FrameSender) -> Option<ServerMessage> {
    let data: Value = match serde_json::from_str(raw) {
        Ok(data) => data,
        Err(err) => {
            warn!("invalid JSON from {client_id}: {err}");
            return Some(ServerMessage::error(format!("Invalid JSON: {err}")));
        }
    };

    match data.get("type").and_then(Value::as_str) {
        Some("start_session") => {
            info!("session start acknowledged for {client_id}");
            Some(ServerMessage::SessionStarted {
                message: "Connected to Gemini AI Live".to_string(),
            })
        }
        Some("screen_frame") => handle_screen_frame(&data, client_id, frames),
        Some("stop_session") => Some(ServerMessage::SessionStopped {
            message: "Session ended".to_string(),
        }),
        other => {
            // Older capture clients send an untyped realtime_input envelope.
            if data.get("realtime_input").is_some() {
                return handle_legacy_input(&data, client_id, frames);
            }
            // "None" for a missing type matches what the original bridge
            // replied; existing clients match on the exact string.
            let received = other.unwrap_or("None");
            warn!("unknown message type '{received}' from {client_id}");
            Some(ServerMessage::error(format!(
                "Unknown message type: {received}"
            )))
        }
    }
}

fn handle_screen_frame(data: &Value, client_id: &str, frames: &FrameSender) -> Option<ServerMessage> {
    let Some(image_data) = data.get("image_data").and_then(Value::as_str) else {
        return Some(ServerMessage::error("No image_data in screen_frame"));
    };
    decode_and_enqueue(image_data, None, client_id, frames)
}

fn handle_legacy_input(data: &Value, client_id: &str, frames: &FrameSender) -> Option<ServerMessage> {
    info!("converting legacy realtime_input payload from {client_id}");

    let payload = data.get("realtime_input").cloned().unwrap_or(Value::Null);
    let input: RealtimeInput = match serde_json::from_value(payload) {
        Ok(input) => input,
        Err(err) => {
            warn!("malformed legacy payload from {client_id}: {err}");
            return Some(ServerMessage::error(format!(
                "Malformed realtime_input: {err}"
            )));
        }
    };
    let Some(chunk) = input.media_chunks.into_iter().next() else {
        return Some(ServerMessage::error("realtime_input carries no media chunks"));
    };
    decode_and_enqueue(&chunk.data, chunk.mime_type, client_id, frames)
}

fn decode_and_enqueue(
    image_data: &str,
    mime_override: Option<String>,
    client_id: &str,
    frames: &FrameSender,
) -> Option<ServerMessage> {
    let mut frame = match Frame::from_base64(image_data) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("frame decode failed for {client_id}: {err}");
            return Some(ServerMessage::error(format!("Invalid image payload: {err}")));
        }
    };
    if let Some(mime_type) = mime_override {
        frame.mime_type = mime_type;
    }

    let bytes = frame.data.len();
    if frames.try_enqueue(frame) {
        debug!("queued {bytes} byte frame from {client_id}");
    } else {
        warn!("frame queue full, dropping frame from {client_id}");
    }
    // Backpressure drops are deliberately not reported to the sender.
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{self, FrameReceiver};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::time::Duration;

    const CLIENT: &str = "127.0.0.1:4242";

    fn queued(rx: &mut FrameReceiver) -> impl std::future::Future<Output = Option<Frame>> + '_ {
        rx.recv_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn start_and_stop_reply_with_acknowledgments() {
        let (tx, _rx) = queue::bounded(1);

        let reply = route_message(r#"{"type":"start_session"}"#, CLIENT, &tx).unwrap();
        assert_eq!(
            reply,
            ServerMessage::SessionStarted {
                message: "Connected to Gemini AI Live".to_string()
            }
        );

        let reply = route_message(r#"{"type":"stop_session"}"#, CLIENT, &tx).unwrap();
        assert_eq!(
            reply,
            ServerMessage::SessionStopped {
                message: "Session ended".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_type_is_echoed_back() {
        let (tx, _rx) = queue::bounded(1);
        let reply = route_message(r#"{"type":"foo"}"#, CLIENT, &tx).unwrap();
        assert_eq!(reply, ServerMessage::error("Unknown message type: foo"));
    }

    #[tokio::test]
    async fn missing_type_reports_none() {
        let (tx, _rx) = queue::bounded(1);
        let reply = route_message(r#"{"image_data":"aGk="}"#, CLIENT, &tx).unwrap();
        assert_eq!(reply, ServerMessage::error("Unknown message type: None"));
    }

    #[tokio::test]
    async fn malformed_json_reports_parse_failure() {
        let (tx, _rx) = queue::bounded(1);
        let reply = route_message("{not json", CLIENT, &tx).unwrap();
        match reply {
            ServerMessage::Error { message } => {
                assert!(message.starts_with("Invalid JSON:"), "got: {message}")
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_frame_is_enqueued_without_a_reply() {
        let (tx, mut rx) = queue::bounded(1);
        let pixels = b"\xff\xd8\xffjpeg-ish";
        let raw = format!(
            r#"{{"type":"screen_frame","image_data":"{}"}}"#,
            STANDARD.encode(pixels)
        );

        assert!(route_message(&raw, CLIENT, &tx).is_none());
        let frame = queued(&mut rx).await.unwrap();
        assert_eq!(frame.data, pixels);
        assert_eq!(frame.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn missing_image_data_is_an_error() {
        let (tx, mut rx) = queue::bounded(1);
        let reply = route_message(r#"{"type":"screen_frame"}"#, CLIENT, &tx).unwrap();
        assert_eq!(reply, ServerMessage::error("No image_data in screen_frame"));
        assert!(queued(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn undecodable_image_is_an_error_and_not_enqueued() {
        let (tx, mut rx) = queue::bounded(1);
        let reply = route_message(
            r#"{"type":"screen_frame","image_data":"!!not-base64!!"}"#,
            CLIENT,
            &tx,
        )
        .unwrap();
        match reply {
            ServerMessage::Error { message } => {
                assert!(message.starts_with("Invalid image payload:"), "got: {message}")
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(queued(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn queue_full_drops_silently() {
        let (tx, mut rx) = queue::bounded(1);
        let raw = format!(
            r#"{{"type":"screen_frame","image_data":"{}"}}"#,
            STANDARD.encode(b"frame")
        );

        assert!(route_message(&raw, CLIENT, &tx).is_none());
        // Queue is now full; the overflow frame is dropped, not errored.
        assert!(route_message(&raw, CLIENT, &tx).is_none());

        assert!(queued(&mut rx).await.is_some());
        assert!(queued(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn legacy_input_matches_screen_frame_path() {
        let (tx, mut rx) = queue::bounded(2);
        let encoded = STANDARD.encode(b"same-pixels");

        let typed = format!(r#"{{"type":"screen_frame","image_data":"{encoded}"}}"#);
        let legacy =
            format!(r#"{{"realtime_input":{{"media_chunks":[{{"data":"{encoded}"}}]}}}}"#);
        assert!(route_message(&typed, CLIENT, &tx).is_none());
        assert!(route_message(&legacy, CLIENT, &tx).is_none());

        let first = queued(&mut rx).await.unwrap();
        let second = queued(&mut rx).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn legacy_input_structural_failures_are_reported() {
        let (tx, _rx) = queue::bounded(1);

        let reply = route_message(
            r#"{"realtime_input":{"media_chunks":[]}}"#,
            CLIENT,
            &tx,
        )
        .unwrap();
        assert_eq!(
            reply,
            ServerMessage::error("realtime_input carries no media chunks")
        );

        let reply = route_message(r#"{"realtime_input":{}}"#, CLIENT, &tx).unwrap();
        match reply {
            ServerMessage::Error { message } => {
                assert!(message.starts_with("Malformed realtime_input:"), "got: {message}")
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn legacy_chunk_mime_type_overrides_default() {
        let (tx, mut rx) = queue::bounded(1);
        let encoded = STANDARD.encode(b"png-pixels");
        let legacy = format!(
            r#"{{"realtime_input":{{"media_chunks":[{{"mime_type":"image/png","data":"{encoded}"}}]}}}}"#
        );

        assert!(route_message(&legacy, CLIENT, &tx).is_none());
        let frame = queued(&mut rx).await.unwrap();
        assert_eq!(frame.mime_type, "image/png");
    }
}
