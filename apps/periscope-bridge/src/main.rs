mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use periscope_bridge::config::Config;
use periscope_bridge::registry::ClientRegistry;
use periscope_bridge::server::BridgeState;
use periscope_bridge::{live, queue, relay, server};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Cli::parse();
    if let Some(Commands::Probe {
        url,
        image,
        wait_secs,
    }) = args.command
    {
        return cli::run_probe(url, image, wait_secs).await;
    }

    let config = Config::from_env()?;
    run(config).await
}

async fn run(config: Config) -> Result<()> {
    info!(
        model = %config.model,
        host = %config.host,
        port = config.port,
        queue_capacity = config.queue_capacity,
        "starting periscope bridge"
    );

    // The session lives for the whole run; a handshake failure is fatal here,
    // before any client is accepted.
    let (live_tx, live_rx) = live::connect(&config.model, &config.api_key)
        .await
        .with_context(|| format!("live session handshake failed for model {}", config.model))?;

    let (frame_tx, frame_rx) = queue::bounded(config.queue_capacity);
    let registry = Arc::new(ClientRegistry::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let outbound = tokio::spawn(relay::outbound_pump(
        frame_rx,
        live_tx,
        shutdown_rx.clone(),
    ));
    let mut inbound = tokio::spawn(relay::inbound_pump(
        live_rx,
        registry.clone(),
        shutdown_rx.clone(),
    ));

    let state = BridgeState {
        registry,
        frames: frame_tx,
        max_message_bytes: config.max_message_bytes,
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("bridge listening on {addr}");

    let mut serve_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(
            listener,
            server::app(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await
    });

    // Run until interrupted or the live session dies out from under us.
    let inbound_joined = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
            None
        }
        joined = &mut inbound => Some(joined),
    };

    // Orderly teardown: stop accepting, let the pumps observe the flag, then
    // the outbound pump closes the session sink on its way out.
    let _ = shutdown_tx.send(true);
    let _ = server_task.await;
    let _ = outbound.await;
    let inbound_joined = match inbound_joined {
        Some(joined) => joined,
        None => inbound.await,
    };

    let outcome = match inbound_joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(anyhow::Error::new(err).context("live session terminated")),
        Err(err) => Err(anyhow::Error::new(err).context("inbound pump failed")),
    };

    match &outcome {
        Ok(()) => info!("bridge stopped"),
        Err(err) => error!("bridge stopped with error: {err:#}"),
    }
    outcome
}
