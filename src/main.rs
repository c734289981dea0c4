//! pocket-ledgerd - ledger engine maintenance daemon
//!
//! Connects the configured backend and runs the periodic maintenance jobs
//! (idempotency upkeep, lock pruning, reconciliation sweeps) until stopped.

use pocket_ledger::jobs::MaintenanceScheduler;
use pocket_ledger::{db, memory_coordinator, pg_coordinator, Backend, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pocket_ledger=debug,pocket_ledgerd=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    tracing::info!(
        backend = ?config.backend,
        environment = %config.environment,
        "Starting pocket-ledgerd"
    );

    match config.backend {
        Backend::Memory => {
            tracing::warn!("Using in-memory stores; all state is lost on exit");
            let coordinator = memory_coordinator(&config);
            let scheduler = MaintenanceScheduler::with_config(coordinator, config.maintenance()).start();

            shutdown_signal().await;
            scheduler.abort();
        }
        Backend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres backend"))?;

            tracing::info!("Connecting to database...");
            let pool = db::connect(database_url, config.database_max_connections).await?;

            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");

            let coordinator = pg_coordinator(pool.clone(), &config);
            let scheduler = MaintenanceScheduler::with_config(coordinator, config.maintenance()).start();

            shutdown_signal().await;
            scheduler.abort();

            pool.close().await;
            tracing::info!("Database connections closed");
        }
    }

    tracing::info!("Goodbye!");
    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}
