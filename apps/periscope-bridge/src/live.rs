//! Upstream session adapter for the Gemini Live API.
//!
//! The bridge holds exactly one live session for its whole run. `connect`
//! performs the `BidiGenerateContent` setup handshake, then splits the socket
//! into a send half (frames + turn prompts) and a receive half (incremental
//! text fragments), so the two pump loops can use the session concurrently
//! without extra locking.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bridge_proto::Frame;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);
const SYSTEM_INSTRUCTION: &str =
    "You are a screen analysis assistant. Describe what is happening in each \
     screen capture clearly and concisely for the person sharing it.";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("live session handshake failed: {0}")]
    Handshake(String),
    #[error("live session closed by upstream")]
    Closed,
    #[error("live session transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("unexpected live session payload: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl LiveError {
    /// A dead or half-dead socket cannot be retried within this run; decode
    /// noise on an otherwise live stream can.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LiveError::Protocol(_))
    }
}

/// Connect to the Gemini Live API and complete the setup handshake.
pub async fn connect(model: &str, api_key: &str) -> Result<(LiveSender, LiveReceiver), LiveError> {
    let url = format!("{LIVE_ENDPOINT}?key={api_key}");
    connect_endpoint(&url, model).await
}

/// Handshake against an explicit endpoint. Split out so tests can stand in a
/// local WebSocket server for the real service.
pub async fn connect_endpoint(
    url: &str,
    model: &str,
) -> Result<(LiveSender, LiveReceiver), LiveError> {
    let (mut stream, _) = connect_async(url)
        .await
        .map_err(|err| LiveError::Handshake(format!("connect failed: {err}")))?;

    let setup = SetupMessage {
        setup: Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: ["TEXT"],
            },
            system_instruction: Content {
                parts: [TextPart {
                    text: SYSTEM_INSTRUCTION,
                }],
            },
        },
    };
    let setup_json = serde_json::to_string(&setup)?;
    stream.send(Message::Text(setup_json.into())).await?;

    wait_for_setup(&mut stream).await?;
    info!(model, "live session established");

    let (sink, source) = stream.split();
    Ok((
        LiveSender { sink },
        LiveReceiver {
            source,
            pending: VecDeque::new(),
        },
    ))
}

async fn wait_for_setup(stream: &mut WsStream) -> Result<(), LiveError> {
    let handshake = async {
        while let Some(message) = stream.next().await {
            let message = message?;
            if message.is_close() {
                return Err(LiveError::Closed);
            }
            let Some(payload) = event_payload(&message) else {
                continue;
            };
            let event: ServerEvent = serde_json::from_slice(payload)
                .map_err(|err| LiveError::Handshake(format!("bad setup response: {err}")))?;
            if event.setup_complete.is_some() {
                return Ok(());
            }
            debug!("ignoring pre-setup event");
        }
        Err(LiveError::Closed)
    };

    match timeout(SETUP_TIMEOUT, handshake).await {
        Ok(result) => result,
        Err(_) => Err(LiveError::Handshake(format!(
            "no setupComplete within {}s",
            SETUP_TIMEOUT.as_secs()
        ))),
    }
}

/// JSON payload of a session event; the service uses both text and binary
/// WebSocket frames to carry it.
fn event_payload(message: &Message) -> Option<&[u8]> {
    match message {
        Message::Text(text) => Some(text.as_bytes()),
        Message::Binary(data) => Some(data.as_ref()),
        _ => None,
    }
}

/// Send half of the live session, owned by the outbound pump.
pub struct LiveSender {
    sink: SplitSink<WsStream, Message>,
}

impl LiveSender {
    /// Forward one captured frame as realtime input.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), LiveError> {
        let message = RealtimeInputMessage {
            realtime_input: RealtimeInputPayload {
                media_chunks: [MediaChunkPayload {
                    mime_type: &frame.mime_type,
                    data: STANDARD.encode(&frame.data),
                }],
            },
        };
        self.send_json(serde_json::to_string(&message)?).await
    }

    /// Send a text turn; `turn_complete` asks the model to respond now.
    pub async fn send_turn(&mut self, text: &str, turn_complete: bool) -> Result<(), LiveError> {
        let message = ClientContentMessage {
            client_content: ClientContent {
                turns: [ContentTurn {
                    role: "user",
                    parts: [TextPart { text }],
                }],
                turn_complete,
            },
        };
        self.send_json(serde_json::to_string(&message)?).await
    }

    async fn send_json(&mut self, json: String) -> Result<(), LiveError> {
        self.sink.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Close the session sink; errors here are moot, the run is over.
    pub async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

/// Receive half of the live session, owned by the inbound pump.
pub struct LiveReceiver {
    source: SplitStream<WsStream>,
    /// Fragments already parsed but not yet handed out; one server event can
    /// carry several text parts.
    pending: VecDeque<String>,
}

impl LiveReceiver {
    /// Next incremental text fragment, in arrival order. `Closed` when the
    /// upstream ends the session; `Protocol` for undecodable events (the
    /// stream itself is still usable afterwards).
    pub async fn next_text(&mut self) -> Result<String, LiveError> {
        loop {
            if let Some(text) = self.pending.pop_front() {
                return Ok(text);
            }

            let message = match self.source.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(LiveError::Transport(err)),
                None => return Err(LiveError::Closed),
            };
            if message.is_close() {
                return Err(LiveError::Closed);
            }
            let Some(payload) = event_payload(&message) else {
                continue;
            };

            let event: ServerEvent = serde_json::from_slice(payload)?;
            if let Some(turn) = event.server_content.and_then(|content| content.model_turn) {
                self.pending.extend(
                    turn.parts
                        .into_iter()
                        .filter_map(|part| part.text)
                        .filter(|text| !text.is_empty()),
                );
            }
        }
    }
}

// Wire shapes for BidiGenerateContent. Only the fields the bridge touches are
// modeled; everything else in a server event is ignored.

#[derive(Debug, Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInputPayload<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputPayload<'a> {
    media_chunks: [MediaChunkPayload<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunkPayload<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContentMessage<'a> {
    client_content: ClientContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent<'a> {
    turns: [ContentTurn<'a>; 1],
    turn_complete: bool,
}

#[derive(Debug, Serialize)]
struct ContentTurn<'a> {
    role: &'a str,
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerEvent {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    #[allow(dead_code)]
    turn_complete: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ModelPart>,
}

#[derive(Debug, Deserialize)]
struct ModelPart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_message_wire_shape() {
        let setup = SetupMessage {
            setup: Setup {
                model: "models/gemini-2.0-flash-live-001",
                generation_config: GenerationConfig {
                    response_modalities: ["TEXT"],
                },
                system_instruction: Content {
                    parts: [TextPart { text: "watch" }],
                },
            },
        };
        assert_eq!(
            serde_json::to_value(&setup).unwrap(),
            json!({
                "setup": {
                    "model": "models/gemini-2.0-flash-live-001",
                    "generationConfig": {"responseModalities": ["TEXT"]},
                    "systemInstruction": {"parts": [{"text": "watch"}]}
                }
            })
        );
    }

    #[test]
    fn realtime_input_wire_shape() {
        let message = RealtimeInputMessage {
            realtime_input: RealtimeInputPayload {
                media_chunks: [MediaChunkPayload {
                    mime_type: "image/jpeg",
                    data: "aGk=".to_string(),
                }],
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "realtimeInput": {
                    "mediaChunks": [{"mimeType": "image/jpeg", "data": "aGk="}]
                }
            })
        );
    }

    #[test]
    fn client_content_wire_shape() {
        let message = ClientContentMessage {
            client_content: ClientContent {
                turns: [ContentTurn {
                    role: "user",
                    parts: [TextPart {
                        text: "describe this",
                    }],
                }],
                turn_complete: true,
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "clientContent": {
                    "turns": [{"role": "user", "parts": [{"text": "describe this"}]}],
                    "turnComplete": true
                }
            })
        );
    }

    #[test]
    fn server_event_parses_text_parts() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"serverContent":{"modelTurn":{"parts":[{"text":"a code "},{"text":"editor"}]},"turnComplete":false}}"#,
        )
        .unwrap();
        let parts: Vec<String> = event
            .server_content
            .unwrap()
            .model_turn
            .unwrap()
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        assert_eq!(parts, vec!["a code ", "editor"]);
    }

    #[test]
    fn server_event_tolerates_unknown_fields() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"setupComplete":{},"usageMetadata":{"promptTokenCount":12}}"#,
        )
        .unwrap();
        assert!(event.setup_complete.is_some());
        assert!(event.server_content.is_none());
    }
}
