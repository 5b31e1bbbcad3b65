//! pgbridge service entry point.
//!
//! Loads configuration, installs the tracing subscriber and runs the bridge
//! until SIGINT/SIGTERM.

mod config;
mod modules;
mod startup;

use pgbridge_core::AuditLogger;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::BridgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = BridgeConfig::load();

    let log_level = loaded
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| Level::INFO.to_string());
    setup_logging(&log_level)?;

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            AuditLogger::new("pgbridge").config_error(&e);
            return Err(e.into());
        }
    };

    startup::run(config).await
}

/// `RUST_LOG` wins over the configured level.
fn setup_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
