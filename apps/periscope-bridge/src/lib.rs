//! Periscope Bridge: a stateless relay between a local screen-capture client
//! and a Gemini Live streaming session.
//!
//! Capture clients connect over WebSocket and submit frames; the bridge
//! forwards each frame (plus an analysis prompt) upstream and fans the
//! session's incremental text responses back out to every connected client.

pub mod config;
pub mod live;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
