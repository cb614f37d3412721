use anyhow::{bail, Result};
use std::env;

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
const DEFAULT_PORT: u16 = 9083;
const DEFAULT_QUEUE_CAPACITY: usize = 5;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Credential for the upstream Live API. Required at startup.
    pub api_key: String,
    pub model: String,
    /// Bound on the frame ingress queue; frames beyond this are dropped.
    pub queue_capacity: usize,
    /// Cap on a single client WebSocket message (base64 frames are large).
    pub max_message_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_key = match env::var("GEMINI_API_KEY").or_else(|_| env::var("GOOGLE_API_KEY")) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("GEMINI_API_KEY (or GOOGLE_API_KEY) environment variable not set"),
        };

        Ok(Self {
            host: env::var("PERISCOPE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PERISCOPE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            api_key,
            model: env::var("PERISCOPE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            queue_capacity: env::var("PERISCOPE_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            max_message_bytes: env::var("PERISCOPE_MAX_MESSAGE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_MESSAGE_BYTES),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}
