//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! CHORUS_TOKEN=... cargo run -p chorus-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use anyhow::Context;
use chorus_common::{try_init_tracing_with_config, ClientConfig, TracingConfig};
use chorus_gateway::{OrchestratorEvent, ShardOrchestrator, WebSocketConnector};
use chorus_rest::RequestDispatcher;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("Failed to load configuration")?;

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        app = %config.app.name,
        env = ?config.app.env,
        encoding = config.gateway.encoding.as_str(),
        "Configuration loaded"
    );

    let rest = RequestDispatcher::new(config.rest.clone()).context("Failed to build REST client")?;
    let connector = Arc::new(WebSocketConnector::from_config(&config.gateway));
    let (orchestrator, mut events) = ShardOrchestrator::connect(&rest, config.gateway.clone(), connector)
        .await
        .context("Failed to start shards")?;

    info!(shards = orchestrator.shard_count(), "Gateway client started");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(OrchestratorEvent::Dispatch { shard_id, envelope }) => {
                    debug!(shard_id, event = envelope.event_name().unwrap_or("?"), seq = ?envelope.s, "Dispatch");
                }
                Some(OrchestratorEvent::Ready { shard_count }) => {
                    info!(shard_count, "All shards ready");
                }
                Some(OrchestratorEvent::ShardReady { shard_id }) => {
                    info!(shard_id, latency = ?orchestrator.latency(), "Shard ready");
                }
                Some(OrchestratorEvent::Reconnecting { shard_id, resumable }) => {
                    warn!(shard_id, resumable, "Shard reconnecting");
                }
                Some(OrchestratorEvent::Debug { shard_id, message }) => {
                    debug!(shard_id = ?shard_id, %message, "Gateway debug");
                }
                Some(OrchestratorEvent::Error { shard_id, message }) => {
                    warn!(shard_id = ?shard_id, %message, "Gateway error");
                }
                Some(OrchestratorEvent::Fatal { shard_id, code, reason }) => {
                    error!(shard_id, code = ?code, %reason, "Unrecoverable gateway close");
                }
                Some(OrchestratorEvent::Shutdown) | None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Ctrl-C received");
                break;
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
