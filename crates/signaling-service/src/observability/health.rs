//! Health endpoints for the signaling service.
//!
//! Kubernetes-compatible probes:
//! - `GET /health` - Liveness (is the process running?)
//! - `GET /ready` - Readiness (is the WebSocket server accepting traffic?)
//! - `GET /status` - Operator snapshot of live counters
//!
//! The `/metrics` endpoint is served separately by
//! `metrics-exporter-prometheus`.

use crate::actors::metrics::ServiceMetrics;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state shared between the server tasks and the probe handlers.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True once the WebSocket listener is bound; false during shutdown.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to accept connections.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (draining for shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Shared state for the health router.
#[derive(Clone)]
struct HealthRouterState {
    health: Arc<HealthState>,
    metrics: Arc<ServiceMetrics>,
}

/// Operator-facing counters.
#[derive(Debug, Serialize)]
struct StatusBody {
    ready: bool,
    rooms: usize,
    connections: usize,
    signals_relayed: u64,
    presence_events: u64,
    deliveries_dropped: u64,
}

/// Create the health router.
pub fn health_router(health: Arc<HealthState>, metrics: Arc<ServiceMetrics>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .with_state(HealthRouterState { health, metrics })
}

async fn liveness_handler(State(state): State<HealthRouterState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<HealthRouterState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status_handler(State(state): State<HealthRouterState>) -> Json<StatusBody> {
    Json(StatusBody {
        ready: state.health.is_ready(),
        rooms: state.metrics.room_count(),
        connections: state.metrics.connection_count(),
        signals_relayed: state.metrics.signals_relayed(),
        presence_events: state.metrics.presence_events(),
        deliveries_dropped: state.metrics.deliveries_dropped(),
    })
}
