//! # DTE Worker
//!
//! Runs the contingency processor until interrupted.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DTE_CONFIG (optional path) ──► DteConfig::load ──► validate           │
//! │                                       │                                 │
//! │                                       ▼                                 │
//! │  Database::new (migrations) ──► HttpTransmitter ──► BreakerRegistry    │
//! │                                       │                                 │
//! │                                       ▼                                 │
//! │  ContingencyProcessor::run (spawned) ◄── ctrl-c / SIGTERM → shutdown   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use dte_core::SystemClock;
use dte_db::Database;
use dte_transmit::{
    BreakerRegistry, ContingencyProcessor, DteConfig, HttpTransmitter, UnsignedJsonSigner,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dte_transmit=debug,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting DTE contingency worker...");

    let config_path = std::env::var_os("DTE_CONFIG").map(PathBuf::from);
    let config = DteConfig::load(config_path)?;
    info!(
        branch_id = %config.branch_id(),
        upstream = %config.upstream.base_url,
        interval_secs = config.contingency.poll_interval_secs,
        "Configuration loaded"
    );

    let db = Database::new(config.database.db_config()?).await?;
    info!("Database ready");

    let clock = Arc::new(SystemClock);
    let transmitter = Arc::new(HttpTransmitter::new(&config.upstream)?);
    let breakers = BreakerRegistry::new(config.breaker, clock);

    let (processor, handle) = ContingencyProcessor::new(
        db.clone(),
        transmitter,
        Arc::new(UnsignedJsonSigner),
        breakers,
        config.contingency,
    );
    let task = tokio::spawn(processor.run());

    shutdown_signal().await;

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Processor already stopped");
    }
    if let Err(e) = task.await {
        error!(error = %e, "Processor task failed");
    }

    db.close().await;
    info!("Worker shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping worker...");
}
