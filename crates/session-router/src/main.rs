//! Session Router
//!
//! WebSocket signaling server that groups connections into rooms and drives
//! per-peer media resources on a media engine.
//!
//! # Servers
//!
//! - WebSocket server for client signaling (default: 0.0.0.0:4000)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Create the media worker
//! 4. Initialize actor system (`SessionRegistryHandle`)
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start WebSocket signaling server
//! 7. Mark ready and wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use session_router::actors::{ActorMetrics, RegistrySettings, SessionRegistryHandle};
use session_router::config::{Config, LogFormat};
use session_router::engine::{LocalMediaEngine, MediaEngine};
use session_router::gateway::{signaling_router, GatewayContext};
use session_router::observability::{health_router, init_metrics_recorder, HealthState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long connections get to run their cleanup after shutdown starts.
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "session_router=debug,tower_http=debug".into()),
    );
    match LogFormat::from_env() {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!("Starting Session Router");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        ws_bind_address = %config.ws_bind_address,
        health_bind_address = %config.health_bind_address,
        listen_ip = %config.listen_ip,
        announced_ip = ?config.announced_ip,
        rtc_min_port = config.rtc_min_port,
        rtc_max_port = config.rtc_max_port,
        max_rooms = config.max_rooms,
        max_peers_per_room = config.max_peers_per_room,
        log_format = ?config.log_format,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    // Media worker: one per process, shared by every room router
    let engine: Arc<dyn MediaEngine> = Arc::new(LocalMediaEngine::new());
    let worker = engine
        .create_worker(&config.worker_settings())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create media worker");
            e
        })?;
    info!(worker_id = %worker.id, "Media worker created");

    // Initialize actor system
    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let registry = SessionRegistryHandle::new(
        config.instance_id.clone(),
        Arc::clone(&engine),
        worker,
        RegistrySettings::from_config(&config),
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    let shutdown_token = CancellationToken::new();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start WebSocket signaling server
    let ws_addr: SocketAddr = config.ws_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.ws_bind_address, "Invalid WebSocket bind address");
        format!("Invalid WebSocket bind address: {e}")
    })?;

    let gateway = Arc::new(GatewayContext {
        registry: registry.clone(),
        engine: Arc::clone(&engine),
        listen: config.transport_listen_config(),
        metrics: Arc::clone(&actor_metrics),
    });
    let ws_app = signaling_router(gateway, shutdown_token.child_token())
        .layer(TraceLayer::new_for_http());

    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        format!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;

    let ws_shutdown_token = shutdown_token.child_token();
    let ws_task = tokio::spawn(async move {
        info!(addr = %ws_addr, "WebSocket server starting");
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown_token.cancelled().await;
            info!("WebSocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    // Worker created and both listeners bound
    health_state.set_ready();
    info!("Session Router running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    // Refuse upgrades and close open sockets; each runs its peer cleanup
    shutdown_token.cancel();
    if tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, ws_task)
        .await
        .is_err()
    {
        warn!("WebSocket server did not stop in time");
    }

    // Close every remaining room (peers' handles, then routers)
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    info!("Session Router shutdown complete");
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
