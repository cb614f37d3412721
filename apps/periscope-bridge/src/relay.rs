//! The two pump loops at the heart of the bridge.
//!
//! The outbound pump drains the frame queue into the live session; the
//! inbound pump streams session fragments back out through the registry.
//! Both run once per bridge lifetime and observe the same shutdown channel.

use bridge_proto::{Frame, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::live::{LiveError, LiveReceiver, LiveSender};
use crate::queue::FrameReceiver;
use crate::registry::ClientRegistry;

/// Fixed instruction sent after every frame to trigger an analysis turn.
pub const ANALYSIS_PROMPT: &str =
    "Please describe what you see in this screen capture in one clear sentence.";

/// Bound on a single dequeue wait, so the pump re-checks shutdown regularly.
const DEQUEUE_WAIT: Duration = Duration::from_secs(1);
/// Pause after a transient upstream failure before trying again.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Forward queued frames to the live session until shutdown. A failed send is
/// logged and retried after a pause; it never terminates the pump.
pub async fn outbound_pump(
    mut frames: FrameReceiver,
    mut live: LiveSender,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(frame) = frames.recv_timeout(DEQUEUE_WAIT).await else {
            continue;
        };
        debug!(
            "forwarding {} byte {} frame upstream",
            frame.data.len(),
            frame.mime_type
        );
        if let Err(err) = forward_frame(&mut live, &frame).await {
            warn!("failed to send frame upstream: {err}");
            tokio::time::sleep(RETRY_PAUSE).await;
        }
    }

    live.close().await;
    debug!("outbound pump stopped");
}

async fn forward_frame(live: &mut LiveSender, frame: &Frame) -> Result<(), LiveError> {
    live.send_frame(frame).await?;
    live.send_turn(ANALYSIS_PROMPT, true).await
}

/// Stream response fragments to every connected client until shutdown.
/// Returns `Err` only for a fatal session failure, which ends the relay run.
pub async fn inbound_pump(
    mut live: LiveReceiver,
    registry: Arc<ClientRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), LiveError> {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            fragment = live.next_text() => match fragment {
                Ok(text) => {
                    debug!(
                        "relaying {} char fragment to {} client(s)",
                        text.len(),
                        registry.client_count()
                    );
                    registry.broadcast(&ServerMessage::AnalysisResponse { text });
                }
                Err(err) if err.is_fatal() => {
                    warn!("live session receive failed: {err}");
                    return Err(err);
                }
                Err(err) => {
                    warn!("live session receive error, retrying: {err}");
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
            }
        }
    }

    debug!("inbound pump stopped");
    Ok(())
}
