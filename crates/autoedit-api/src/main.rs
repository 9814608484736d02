//! Axum API server binary.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use autoedit_api::{create_router, metrics, ApiConfig, AppState};
use autoedit_worker::WorkerConfig;

/// How long running jobs get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    init_tracing();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autoedit=info,tower_http=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting autoedit-api");

    let config = ApiConfig::from_env().context("Invalid API configuration")?;
    let worker_config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    info!(
        "API config: host={}, port={}, upload_folder={}, production={}",
        config.host,
        config.port,
        config.upload_folder.display(),
        config.is_production()
    );
    info!(
        "Worker config: max_jobs={}, retention={}s, cleanup_interval={}s",
        worker_config.max_concurrent_jobs, worker_config.retention_secs, worker_config.cleanup_interval_secs
    );

    let state = AppState::new(config.clone(), worker_config)
        .await
        .context("Failed to create application state")?;

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    // Retention sweeper runs for the life of the process
    tokio::spawn(state.sweeper.clone().run());

    let executor = state.executor.clone();
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Waiting for running jobs to finish");
    executor.shutdown(SHUTDOWN_GRACE).await;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
