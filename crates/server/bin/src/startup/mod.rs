//! Startup module - wires configuration, adapters and modules into a running
//! bridge and keeps it up until a shutdown signal arrives.

pub mod shutdown;

use std::sync::Arc;

use anyhow::Context;
use pgbridge_core::{AuditLogger, Bridge, BridgePorts, ModuleRegistry, Severity};
use pgbridge_pg::{PgAuditBackend, PgChannelSubscriber, PgConnector};
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::modules;
use shutdown::{start_signal_handler, GracefulShutdown, ShutdownConfig};

/// Current application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the complete application lifecycle against PostgreSQL.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    info!(
        "Starting {} v{} with {} database(s)",
        config.service_name,
        APP_VERSION,
        config.databases.len()
    );

    let logger = AuditLogger::with_config(&config.service_name, config.audit_config());
    logger.config_loaded(config.databases.len(), config.module_count());

    let ports = BridgePorts::new(
        Arc::new(PgConnector::new()),
        Arc::new(PgChannelSubscriber::new()),
        Arc::new(PgAuditBackend::new(&config.service_name, APP_VERSION)),
    );
    let registry = modules::builtin_registry();

    let shutdown = GracefulShutdown::new(
        ShutdownConfig::default().with_timeout(config.shutdown_timeout()),
    );
    start_signal_handler(&shutdown);

    serve(&config, &registry, ports, logger, &shutdown).await
}

/// Starts the bridge, waits for `shutdown` and tears the bridge down within
/// the configured timeout.
pub async fn serve(
    config: &BridgeConfig,
    registry: &ModuleRegistry,
    ports: BridgePorts,
    logger: AuditLogger,
    shutdown: &GracefulShutdown,
) -> anyhow::Result<()> {
    let bridge = Bridge::new(
        config.databases.clone(),
        registry,
        ports,
        logger.clone(),
        config.bridge_settings(),
    );

    // Bridge::start has already rolled back and flushed on failure.
    bridge.start().await.context("Failed to start bridge")?;
    logger.service_started(APP_VERSION, bridge.database_count());
    info!("✓ Bridge running on {} database(s)", bridge.database_count());

    let signal = shutdown.wait_for_signal().await;
    logger.system(
        Severity::Info,
        "main",
        format!("Received shutdown signal ({})", signal.reason),
    );
    logger.service_stopped();

    let timeout = shutdown.config().timeout;
    if tokio::time::timeout(timeout, bridge.shutdown()).await.is_err() {
        warn!("Shutdown did not complete within {:?}", timeout);
    } else {
        info!("✓ Shutdown complete");
    }
    Ok(())
}
