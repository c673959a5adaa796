//! Room Service
//!
//! Conversation membership and presence engine.
//!
//! # Servers
//!
//! - HTTP server for health, metrics and monitoring (default: 0.0.0.0:8090)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Start the engine (actors, event dispatcher, backend listeners, sweeper)
//! 5. Start HTTP server
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::config::LogFormat;
use room_service::config::Config;
use room_service::observability::{init_metrics_recorder, HealthState};
use room_service::routes::build_routes;
use room_service::EngineBuilder;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long actors get to finish in-flight work on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it carries the log format
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_filter));
    let registry = tracing_subscriber::registry().with(filter);
    match config.observability.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!("Starting Room Service");
    info!(
        server_url = %config.server_url,
        http_bind_address = %config.http_bind_address,
        signaling = config.signaling.is_some(),
        recording = config.recording.is_some(),
        federation_enabled = config.federation_enabled,
        session_sweep_interval_secs = config.session_sweep_interval.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to initialize metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let engine = EngineBuilder::from_config(&config).build().map_err(|e| {
        error!(error = %e, "Failed to start room engine");
        e
    })?;

    let addr: SocketAddr = config.http_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.http_bind_address, "Invalid HTTP bind address");
        format!("Invalid HTTP bind address: {e}")
    })?;

    let app = build_routes(engine.monitor(), Arc::clone(&health_state), metrics_handle);

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP server");
        format!("Failed to bind HTTP server to {addr}: {e}")
    })?;

    let http_shutdown_token = CancellationToken::new();
    let server_token = http_shutdown_token.clone();
    let server_task = tokio::spawn(async move {
        info!(addr = %addr, "HTTP server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!("Room Service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Not ready first so load balancers stop routing here
    health_state.set_not_ready();

    engine.shutdown(SHUTDOWN_DEADLINE).await;

    http_shutdown_token.cancel();
    if let Err(e) = server_task.await {
        error!(error = %e, "HTTP server task failed");
    }

    info!("Room Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
