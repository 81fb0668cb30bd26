use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pix360_core::http::Fetcher;
use pix360_db::PgConversionStore;
use pix360_modules::ModuleRegistry;
use pix360_worker::{Dispatcher, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pix360_worker=debug,pix360_modules=debug,pix360_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().expect("Invalid worker configuration");
    tracing::info!(
        stitcher = ?config.stitcher,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        keep_intermediate_assets = config.keep_intermediate_assets,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = pix360_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    pix360_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    // --- Downloader modules ---
    let fetcher = Fetcher::reqwest(config.retry_policy()).expect("Failed to build HTTP client");
    let registry = ModuleRegistry::from_manifest_path(config.modules_manifest.as_deref(), &fetcher)
        .expect("Failed to load downloader modules");
    if registry.is_empty() {
        tracing::warn!("No downloader modules installed; every conversion will fail");
    }
    let identifiers: Vec<&str> = registry.descriptors().map(|d| d.identifier()).collect();
    tracing::info!(modules = ?identifiers, "Downloader modules loaded");

    // --- Dispatcher ---
    let dispatcher = Dispatcher::new(
        Arc::new(PgConversionStore::new(pool)),
        Arc::new(registry),
        config.stitching_engine(),
    )
    .with_poll_interval(config.poll_interval)
    .with_intermediate_assets(config.keep_intermediate_assets)
    .with_span(tracing::info_span!("worker"));

    let cancel = tokio_util::sync::CancellationToken::new();
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });

    shutdown_signal().await;

    // --- Cleanup ---
    tracing::info!("Waiting for the in-flight conversion to finish");
    cancel.cancel();

    if tokio::time::timeout(Duration::from_secs(30), dispatcher_handle)
        .await
        .is_err()
    {
        tracing::warn!("Dispatcher did not stop in time; the claimed conversion stays active");
    }

    tracing::info!("Worker shut down");
}

/// Wait for a shutdown signal.
///
/// Handles SIGINT (Ctrl-C) and, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
