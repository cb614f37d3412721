//! Tracks connected capture clients for broadcast and cleanup.
//!
//! Each connection owns an unbounded channel drained by its writer task;
//! the registry only holds the sending half. Membership changes on connect,
//! disconnect, and post-broadcast pruning of dead senders.

use axum::extract::ws::Message;
use bridge_proto::ServerMessage;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, mpsc::UnboundedSender<Message>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client_id: String, tx: mpsc::UnboundedSender<Message>) {
        self.clients.insert(client_id, tx);
    }

    pub fn unregister(&self, client_id: &str) {
        self.clients.remove(client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Best-effort fan-out: serialize once, attempt every client, and prune
    /// the ones whose writer task is gone after the pass completes.
    pub fn broadcast(&self, message: &ServerMessage) {
        if self.clients.is_empty() {
            return;
        }

        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to serialize broadcast message: {err}");
                return;
            }
        };

        let mut disconnected = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().send(Message::Text(json.clone())).is_err() {
                disconnected.push(entry.key().clone());
            }
        }

        for client_id in disconnected {
            debug!("pruning disconnected client {client_id}");
            self.clients.remove(&client_id);
        }
    }
}
