//! Watch Party Signaling Relay
//!
//! # Servers
//!
//! - HTTP server for the room API and WebSocket signaling (default: 0.0.0.0:8080)
//! - HTTP server for health and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing and load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Create the session registry and spawn the eviction task
//! 4. Bind and start the health server, then the API server
//! 5. Mark ready and wait for a shutdown signal

use std::sync::Arc;
use std::time::Duration;

use relay_service::config::{Config, LogFormat};
use relay_service::observability::metrics::init_metrics_recorder;
use relay_service::observability::{health_router, HealthState};
use relay_service::rooms::SessionRegistry;
use relay_service::routes::{build_routes, AppState};
use relay_service::tasks::start_eviction_sweep;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long background tasks get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is loaded before tracing so the log format can be chosen.
    let config_result = Config::from_env();
    let log_format = config_result
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or_default();
    init_tracing(log_format);

    info!("Starting signaling relay");

    let config = config_result.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        api_prefix = %config.api_prefix,
        eviction_interval_seconds = config.eviction_interval.as_secs(),
        max_idle_seconds = config.max_idle.as_secs(),
        max_pending_messages = config.max_pending_messages,
        max_cached_tracks = config.max_cached_tracks,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to initialize metrics");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let registry = Arc::new(SessionRegistry::new(config.session_limits()));
    let shutdown_token = CancellationToken::new();

    let eviction_handle = tokio::spawn(start_eviction_sweep(
        Arc::clone(&registry),
        config.eviction(),
        shutdown_token.child_token(),
    ));

    // Health server (bind before spawning to fail fast)
    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));
    let health_listener = tokio::net::TcpListener::bind(config.health_bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.health_bind_address, "Failed to bind health server");
            e
        })?;
    let health_token = shutdown_token.child_token();
    let health_handle = tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %config.health_bind_address, "Health server started");

    // API + signaling server
    let bind_address = config.bind_address;
    let state = Arc::new(AppState::new(Arc::clone(&registry), config));
    let app = build_routes(state);
    let api_listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %bind_address, "Failed to bind API server");
            e
        })?;
    let api_token = shutdown_token.child_token();
    let api_handle = tokio::spawn(async move {
        let server = axum::serve(api_listener, app).with_graceful_shutdown(async move {
            api_token.cancelled().await;
            info!("API server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "API server failed");
        }
    });
    info!(addr = %bind_address, "API server started");

    health_state.set_ready();
    info!("Signaling relay running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so traffic stops arriving
    health_state.set_not_ready();
    shutdown_token.cancel();

    let shutdown = async {
        let _ = tokio::join!(eviction_handle, api_handle, health_handle);
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, shutdown).await.is_err() {
        warn!(
            grace_seconds = SHUTDOWN_GRACE.as_secs(),
            "Tasks did not finish within the shutdown grace period"
        );
    }

    let rooms_dropped = registry.room_count().await;
    info!(rooms_dropped, "Signaling relay shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relay_service=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
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
