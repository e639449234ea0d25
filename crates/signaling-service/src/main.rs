//! Signaling Service
//!
//! WebSocket signaling server for room presence and WebRTC negotiation
//! relay.
//!
//! # Servers
//!
//! - WebSocket server for client signaling (default: 0.0.0.0:8080)
//! - HTTP server for health and metrics endpoints (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Install the Prometheus metrics recorder
//! 3. Spawn the metadata notifier task
//! 4. Spawn the actor system (`RoomDirectoryActor`)
//! 5. Start the health HTTP server (liveness, readiness, status, metrics)
//! 6. Start the WebSocket server and mark the service ready
//! 7. Wait for a shutdown signal, then drain the actor tree

#![warn(clippy::pedantic)]

use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use signaling_service::actors::{RoomDirectoryActor, ServiceMetrics};
use signaling_service::config::Config;
use signaling_service::coordinator::SignalingCoordinator;
use signaling_service::metadata::MetadataNotifier;
use signaling_service::observability::{health_router, HealthState};
use signaling_service::registry::ConnectionRegistry;
use signaling_service::transport::{ws_router, TransportState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Signaling Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        room_grace_secs = config.room_grace_window.as_secs(),
        outbound_queue_capacity = config.outbound_queue_capacity,
        metadata_configured = config.metadata_base_url.is_some(),
        "Configuration loaded successfully"
    );

    // The Prometheus recorder must be installed before any metrics are
    // recorded.
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;

    let metrics = ServiceMetrics::new();
    let health_state = Arc::new(HealthState::new());

    // Root of the cancellation tree: shutdown cancels everything below.
    let shutdown_token = CancellationToken::new();

    // Metadata collaborator (fire-and-forget).
    let (notifier, notifier_task) = MetadataNotifier::spawn(
        config.metadata_base_url.clone(),
        shutdown_token.child_token(),
    );

    // Actor system.
    let (directory, directory_task) = RoomDirectoryActor::spawn(
        config.room_grace_window,
        shutdown_token.child_token(),
        notifier.clone(),
        Arc::clone(&metrics),
    );

    let coordinator = SignalingCoordinator::new(
        ConnectionRegistry::new(),
        directory,
        notifier,
        Arc::clone(&metrics),
    );

    // Health and metrics server.
    let health_app = health_router(Arc::clone(&health_state), Arc::clone(&metrics)).route(
        "/metrics",
        get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_listener = tokio::net::TcpListener::bind(&config.health_bind_address).await?;
    info!(
        health_bind_address = %config.health_bind_address,
        "Health server listening"
    );
    let health_shutdown = shutdown_token.clone();
    let health_server = tokio::spawn(async move {
        let result = axum::serve(health_listener, health_app)
            .with_graceful_shutdown(async move { health_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Health server error");
        }
    });

    // WebSocket server.
    let transport_state = TransportState::new(
        coordinator.clone(),
        config.outbound_queue_capacity,
        shutdown_token.child_token(),
    );
    let ws_app = ws_router(transport_state);
    let ws_listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(bind_address = %config.bind_address, "WebSocket server listening");
    let ws_shutdown = shutdown_token.clone();
    let ws_server = tokio::spawn(async move {
        let result = axum::serve(ws_listener, ws_app)
            .with_graceful_shutdown(async move { ws_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "WebSocket server error");
        }
    });

    health_state.set_ready();
    info!("Signaling Service ready");

    shutdown_signal().await;
    info!("Shutdown signal received, draining");
    health_state.set_not_ready();

    // Cancel the whole tree: servers stop accepting, connection actors
    // stop delivering, the directory drains its rooms.
    shutdown_token.cancel();

    let drain = async {
        let _ = directory_task.await;
        let _ = notifier_task.await;
        let _ = ws_server.await;
        let _ = health_server.await;
    };
    if tokio::time::timeout(config.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    info!("Signaling Service stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
