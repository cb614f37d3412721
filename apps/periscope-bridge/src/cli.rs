use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bridge_proto::{ClientMessage, ServerMessage};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "periscope-bridge")]
#[command(about = "Relay between a screen-capture client and the Gemini Live API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running bridge and exercise the client protocol
    Probe {
        /// Bridge URL
        #[arg(short, long, default_value = "ws://127.0.0.1:9083")]
        url: String,

        /// Image file to submit as a screen frame
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// How long to listen for relayed responses, in seconds
        #[arg(short, long, default_value_t = 15)]
        wait_secs: u64,
    },
}

/// Minimal debug client: start a session, optionally push one frame, then
/// print whatever the bridge relays back.
pub async fn run_probe(url: String, image: Option<PathBuf>, wait_secs: u64) -> Result<()> {
    let ws_url = format!("{url}/ws");
    debug!("connecting to {ws_url}");

    let (ws_stream, _) = timeout(Duration::from_secs(5), connect_async(&ws_url))
        .await
        .map_err(|_| anyhow!("connection timeout - is the bridge running?"))?
        .with_context(|| format!("failed to connect to {ws_url}"))?;
    let (mut write, mut read) = ws_stream.split();

    let start = serde_json::to_string(&ClientMessage::StartSession)?;
    write.send(Message::Text(start.into())).await?;

    if let Some(path) = image {
        let bytes =
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let frame = ClientMessage::ScreenFrame {
            image_data: Some(STANDARD.encode(&bytes)),
        };
        write
            .send(Message::Text(serde_json::to_string(&frame)?.into()))
            .await?;
        println!("sent {} byte frame from {}", bytes.len(), path.display());
    }

    let listen = async {
        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::SessionStarted { message }) => {
                        println!("session started: {message}")
                    }
                    Ok(ServerMessage::SessionStopped { message }) => {
                        println!("session stopped: {message}")
                    }
                    Ok(ServerMessage::AnalysisResponse { text }) => println!("analysis: {text}"),
                    Ok(ServerMessage::Error { message }) => println!("error: {message}"),
                    Err(err) => debug!("unparsed message {text}: {err}"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok::<_, anyhow::Error>(())
    };

    match timeout(Duration::from_secs(wait_secs), listen).await {
        Ok(result) => result?,
        Err(_) => println!("done listening"),
    }
    Ok(())
}
