//! # GOpen Gateway - Main Entry Point
//!
//! Loads the configuration, initializes logging and metrics, compiles the runtime and serves
//! it until Ctrl-C or SIGTERM. With `hot_reload` enabled, configuration file changes rebuild
//! the runtime without restarting the listener.
//!
//! The configuration path is the first argument, then `GATEWAY_CONFIG_PATH`, then
//! `config/gateway.yaml`.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use gopen_gateway::core::config::{ConfigChangeEvent, ConfigCommitter};
use gopen_gateway::gateway::{shutdown_signal, GatewayServer, Runtime, RuntimeHandle};
use gopen_gateway::observability::{init_logging, install_prometheus};
use gopen_gateway::{ConfigManager, GatewayError, GatewayResult};

const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEWAY_CONFIG_PATH").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let manager = ConfigManager::new(&config_path).await?;
    let config = manager.get_config().await.clone();

    init_logging(&config.logging)?;
    info!("Starting GOpen gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(path = %config_path, endpoints = config.endpoints.len(), "Configuration loaded");

    install_prometheus(&config.metrics).map_err(|e| GatewayError::config(e.to_string()))?;

    let runtime = Runtime::build(&config).await.map_err(|e| {
        error!("Failed to build runtime: {}", e);
        e
    })?;
    let handle = RuntimeHandle::new(runtime);

    if config.hot_reload {
        info!("Hot reload enabled, watching {}", config_path);
        tokio::spawn(apply_config_changes(
            manager.subscribe_to_changes(),
            manager.committer(),
            handle.clone(),
        ));
    }

    GatewayServer::new(handle).run(shutdown_signal()).await?;

    info!("GOpen gateway shutdown complete");
    Ok(())
}

/// Rebuild the runtime for every published configuration, committing the ones that compiled
async fn apply_config_changes(
    mut changes: broadcast::Receiver<ConfigChangeEvent>,
    committer: ConfigCommitter,
    handle: RuntimeHandle,
) {
    loop {
        match changes.recv().await {
            Ok(event) => {
                info!(path = %event.file_path.display(), "Configuration changed, rebuilding runtime");
                // the previous runtime and configuration stay on error
                if handle.reload(&event.config).await.is_ok() {
                    committer.commit(event.config).await;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed configuration changes, waiting for the next one");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
