//! Bounded frame ingress queue between client message handling and the
//! outbound pump. Producers never block: a full queue drops the frame. The
//! consumer waits with a timeout so it can re-check the shutdown flag.

use bridge_proto::Frame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;

pub fn bounded(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (FrameSender { tx }, FrameReceiver { rx })
}

#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
}

impl FrameSender {
    /// Enqueue without waiting. Returns `false` when the queue is full (or the
    /// relay is gone), in which case the frame is dropped.
    pub fn try_enqueue(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }
}

pub struct FrameReceiver {
    rx: mpsc::Receiver<Frame>,
}

impl FrameReceiver {
    /// Wait up to `wait` for the next frame; `None` on timeout or when every
    /// sender has been dropped.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<Frame> {
        match timeout(wait, self.rx.recv()).await {
            Ok(frame) => frame,
            Err(_) => None,
        }
    }
}
