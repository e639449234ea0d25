//! Service-wide counters shared across the actor hierarchy.
//!
//! Atomics give the actors lock-free updates; the same events are mirrored
//! to the `metrics` facade so the Prometheus exporter in `main` picks them
//! up under the `sg_` prefix.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Aggregated metrics for the signaling service.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    /// Rooms currently present in the directory (Active or Draining).
    active_rooms: AtomicUsize,
    /// Live transport connections.
    active_connections: AtomicUsize,
    /// Total signal payloads relayed (one per fan-out, not per recipient).
    signals_relayed: AtomicU64,
    /// Total presence events broadcast (one per membership change).
    presence_events: AtomicU64,
    /// Outbound deliveries dropped by the overflow policy.
    deliveries_dropped: AtomicU64,
}

impl ServiceMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
        gauge!("sg_rooms_active").increment(1.0);
    }

    pub fn room_removed(&self) {
        self.active_rooms.fetch_sub(1, Ordering::Relaxed);
        gauge!("sg_rooms_active").decrement(1.0);
    }

    pub fn connection_registered(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        gauge!("sg_connections_active").increment(1.0);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        gauge!("sg_connections_active").decrement(1.0);
    }

    pub fn signal_relayed(&self) {
        self.signals_relayed.fetch_add(1, Ordering::Relaxed);
        counter!("sg_signals_relayed_total").increment(1);
    }

    pub fn presence_broadcast(&self) {
        self.presence_events.fetch_add(1, Ordering::Relaxed);
        counter!("sg_presence_events_total").increment(1);
    }

    pub fn delivery_dropped(&self) {
        self.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("sg_deliveries_dropped_total").increment(1);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn signals_relayed(&self) -> u64 {
        self.signals_relayed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn presence_events(&self) -> u64 {
        self.presence_events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn deliveries_dropped(&self) -> u64 {
        self.deliveries_dropped.load(Ordering::Relaxed)
    }
}
