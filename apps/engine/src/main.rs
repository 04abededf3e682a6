//! # Stockroom Engine
//!
//! Runs the offline engine as a local daemon.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. init_tracing()          RUST_LOG or "info,stockroom=debug"          │
//! │  2. EngineConfig            engine.toml + STOCKROOM_* overrides         │
//! │  3. EngineContext::open     SQLite, upstream client                     │
//! │  4. install()               precache shell, create offline schema       │
//! │  5. activate()              drop stale caches, claim clients, drain     │
//! │  6. server::start           serve until Ctrl+C / SIGTERM                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockroom_sync::{server, EngineConfig, EngineContext};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    info!("Starting Stockroom engine...");

    let config = EngineConfig::load_or_default(None);
    let addr = config.bind_addr()?;
    info!(
        upstream = %config.upstream_url(),
        version = %config.app.version,
        "Configuration loaded"
    );

    let ctx = EngineContext::open(config).await?;
    match ctx.db.status().await {
        Ok(status) => info!(
            migrations = status.migrations_applied,
            schema_version = status.schema_version,
            "Database ready"
        ),
        Err(e) => warn!(error = %e, "Could not read database status"),
    }

    // Without a shell the engine still proxies, it just cannot cache.
    match ctx.install().await {
        Ok(cached) => {
            info!(cached, "Install complete");
            let report = ctx.activate().await?;
            info!(
                deleted = report.deleted_caches.len(),
                claimed = report.claimed_clients,
                "Activation complete"
            );
        }
        Err(e) => error!(error = %e, "Install failed, serving in pass-through mode"),
    }

    let handle = server::start(ctx.clone(), addr).await?;
    info!(addr = %handle.local_addr(), "Engine listening");

    shutdown_signal().await;
    handle.shutdown().await?;
    ctx.db.close().await;

    info!("Engine shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockroom=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
