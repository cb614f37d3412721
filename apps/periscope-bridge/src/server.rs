//! Client-facing WebSocket listener.
//!
//! Each accepted connection gets a writer task fed by an unbounded channel
//! (the registry holds the sending half for broadcasts) and a sequential read
//! loop that feeds the message router. Registry membership changes only on
//! accept and disconnect.

use bridge_proto::ServerMessage;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::queue::FrameSender;
use crate::registry::ClientRegistry;
use crate::router::route_message;

#[derive(Clone)]
pub struct BridgeState {
    pub registry: Arc<ClientRegistry>,
    pub frames: FrameSender,
    pub max_message_bytes: usize,
}

pub fn app(state: BridgeState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<BridgeState>,
) -> Response {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(socket: WebSocket, state: BridgeState, remote_addr: SocketAddr) {
    let client_id = remote_addr.to_string();
    info!("capture client connected: {client_id}");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer_id = client_id.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
        debug!("writer task ended for {writer_id}");
    });

    state.registry.register(client_id.clone(), tx.clone());

    while let Some(result) = receiver.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                warn!("websocket error from {client_id}: {err}");
                break;
            }
        };

        match message {
            Message::Text(text) => handle_text(&text, &client_id, &state, &tx),
            // Some clients ship their JSON in binary frames.
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => handle_text(&text, &client_id, &state, &tx),
                Err(_) => {
                    warn!("non-UTF8 binary frame from {client_id}");
                    send_reply(
                        &ServerMessage::error("Invalid UTF-8 in binary frame"),
                        &client_id,
                        &tx,
                    );
                }
            },
            Message::Close(_) => {
                debug!("close frame from {client_id}");
                break;
            }
            _ => {}
        }
    }

    state.registry.unregister(&client_id);
    info!("capture client disconnected: {client_id}");
}

fn handle_text(
    text: &str,
    client_id: &str,
    state: &BridgeState,
    tx: &mpsc::UnboundedSender<Message>,
) {
    if let Some(reply) = route_message(text, client_id, &state.frames) {
        send_reply(&reply, client_id, tx);
    }
}

fn send_reply(reply: &ServerMessage, client_id: &str, tx: &mpsc::UnboundedSender<Message>) {
    match serde_json::to_string(reply) {
        Ok(json) => {
            // A failed send means the writer task is gone; disconnect cleanup
            // handles the registry entry.
            let _ = tx.send(Message::Text(json));
        }
        Err(err) => warn!("failed to serialize reply for {client_id}: {err}"),
    }
}
