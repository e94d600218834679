//! supervisor-link entry point.
//!
//! Connects to the supervisor and logs the state of the entities listed in
//! `SUPERVISOR_ENTITIES` until interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use supervisor_link::channel::WebSocketTransport;
use supervisor_link::config::SupervisorConfig;
use supervisor_link::devices::{DeviceService, DevicesUpdaters, StateLogService};
use supervisor_link::supervisor::SupervisorCore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = SupervisorConfig::from_env()?;
    tracing::info!(
        endpoint = %config.endpoint,
        entities = config.tracked_entities.len(),
        "starting supervisor-link"
    );

    // Build device layer
    let state_log: Arc<dyn DeviceService> =
        Arc::new(StateLogService::new(config.tracked_entities.clone()));
    let devices = Arc::new(DevicesUpdaters::new([state_log])?);

    // Build protocol layer
    let core = Arc::new(SupervisorCore::new(&config, devices)?);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    core.run(Arc::new(WebSocketTransport::new()), &cancel).await?;

    tracing::info!("supervisor-link stopped");
    Ok(())
}

/// Cancels `token` on Ctrl+C.
async fn shutdown_signal(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => tracing::error!(error = %err, "failed to listen for shutdown signal"),
    }
    token.cancel();
}
