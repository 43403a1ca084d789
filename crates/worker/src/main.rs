use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geoincra_worker::config::WorkerConfig;
use geoincra_worker::dispatcher::Dispatcher;
use geoincra_worker::registry::DriverRegistry;
use geoincra_worker::stores::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "geoincra_worker=debug,geoincra_portals=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
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

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        data_dir = %config.storage.data_dir.display(),
        serving_base = %config.storage.serving_base.display(),
        webdriver_url = %config.webdriver_url,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = geoincra_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    geoincra_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    if config.run_migrations {
        geoincra_db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");
    }

    // --- Drivers ---
    let cipher = config.cipher().context("Invalid credential key")?;
    if !cipher.is_enabled() {
        tracing::warn!("CREDENTIALS_KEY not set, sealed credentials cannot be used");
    }
    let registry = DriverRegistry::from_config(&config).context("Failed to build WebDriver client")?;

    tokio::fs::create_dir_all(config.download_root())
        .await
        .with_context(|| format!("Failed to create {}", config.download_root().display()))?;

    // --- Dispatcher ---
    let store = Arc::new(PgStore::new(pool.clone()));
    let dispatcher = Dispatcher::new(
        store.clone(),
        store.clone(),
        store,
        registry,
        cipher,
        config.storage.clone(),
        config.claim_scope(),
    );

    let cancel = CancellationToken::new();
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });

    shutdown_signal().await;

    // The dispatcher observes cancellation only between jobs.
    cancel.cancel();
    if let Err(e) = dispatcher_handle.await {
        tracing::error!(error = %e, "Dispatcher task panicked");
    }

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
///
/// A handler that cannot be installed is logged and never resolves, so the
/// other signal still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), waiting for the current job");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, waiting for the current job");
        }
    }
}
