//! Farepass Redemption Server
//!
//! Main server process for the redemption service.
//!
//! This binary:
//! - Connects to `PostgreSQL` and runs migrations
//! - Exposes Prometheus metrics for scraping
//! - Serves the scan and audit API over HTTP
//! - Shuts down gracefully on SIGINT/SIGTERM
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin farepass-server
//! ```

mod config;

use config::Config;
use farepass_core::engine::RedemptionEngine;
use farepass_core::token::HmacTokenVerifier;
use farepass_postgres::{MIGRATOR, PgRedemptionRepository};
use farepass_web::{AppState, build_router};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,farepass=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Farepass redemption server...");

    // Load configuration
    let config = Config::from_env();
    tracing::info!(
        postgres = %config.postgres.url,
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    // Connect to PostgreSQL and bring the schema up to date
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .idle_timeout(Duration::from_secs(config.postgres.idle_timeout))
        .connect(&config.postgres.url)
        .await?;
    MIGRATOR.run(&pool).await?;
    tracing::info!("Database ready");

    // Prometheus exporter
    let metrics_addr: SocketAddr =
        format!("{}:{}", config.metrics.host, config.metrics.port).parse()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    tracing::info!(addr = %metrics_addr, "Metrics exporter listening");

    // Wire the engine
    let repository = PgRedemptionRepository::new(pool)
        .with_lock_wait(Duration::from_millis(config.redemption.lock_wait_ms));
    let engine = RedemptionEngine::new(
        Arc::new(repository),
        Arc::new(HmacTokenVerifier::new(
            config.redemption.token_secret.as_bytes().to_vec(),
        )),
    );
    let router = build_router(AppState::new(engine));

    // Serve until interrupted
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Farepass redemption server is running");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout))
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives; in-flight scans get
/// `shutdown_timeout` seconds to finish before the process exits anyway.
async fn shutdown_signal(shutdown_timeout: u64) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => tracing::error!(%error, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!(
        timeout_secs = shutdown_timeout,
        "Shutdown signal received, draining in-flight scans"
    );
    // Hard deadline for the drain; axum stops accepting new connections
    // as soon as this future resolves.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        tracing::warn!("Drain deadline reached, exiting");
        std::process::exit(0);
    });
}
