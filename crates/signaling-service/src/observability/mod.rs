//! Observability: health probes and the operator status endpoint.

pub mod health;

pub use health::{health_router, HealthState};
