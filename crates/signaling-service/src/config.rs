//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; nothing here is secret, so the plain Debug derive is fine.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket/HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default grace window for empty rooms, in seconds.
pub const DEFAULT_ROOM_GRACE_SECONDS: u64 = 60;

/// Default bounded capacity of a connection's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Default graceful shutdown timeout, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Signaling service configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket/HTTP server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// How long an empty room drains before eviction.
    pub room_grace_window: Duration,

    /// Bounded capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,

    /// Graceful shutdown timeout.
    pub shutdown_timeout: Duration,

    /// Base URL of the meeting-metadata collaborator, if configured.
    pub metadata_base_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SG_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SG_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let room_grace_seconds = parse_var(
            vars,
            "SG_ROOM_GRACE_SECONDS",
            DEFAULT_ROOM_GRACE_SECONDS,
        )?;

        let outbound_queue_capacity: usize = parse_var(
            vars,
            "SG_OUTBOUND_QUEUE_CAPACITY",
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        )?;
        if outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "SG_OUTBOUND_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        let shutdown_timeout_seconds = parse_var(
            vars,
            "SG_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?;

        let metadata_base_url = vars
            .get("SG_METADATA_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string());

        Ok(Config {
            bind_address,
            health_bind_address,
            room_grace_window: Duration::from_secs(room_grace_seconds),
            outbound_queue_capacity,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_seconds),
            metadata_base_url,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}: {raw}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(
            config.room_grace_window,
            Duration::from_secs(DEFAULT_ROOM_GRACE_SECONDS)
        );
        assert_eq!(
            config.outbound_queue_capacity,
            DEFAULT_OUTBOUND_QUEUE_CAPACITY
        );
        assert!(config.metadata_base_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("SG_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
            ("SG_ROOM_GRACE_SECONDS".to_string(), "5".to_string()),
            ("SG_OUTBOUND_QUEUE_CAPACITY".to_string(), "128".to_string()),
            (
                "SG_METADATA_BASE_URL".to_string(),
                "http://metadata:8000/".to_string(),
            ),
        ]);

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.room_grace_window, Duration::from_secs(5));
        assert_eq!(config.outbound_queue_capacity, 128);
        // Trailing slash is normalized away.
        assert_eq!(
            config.metadata_base_url.as_deref(),
            Some("http://metadata:8000")
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let vars = HashMap::from([("SG_ROOM_GRACE_SECONDS".to_string(), "soon".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        let vars = HashMap::from([("SG_OUTBOUND_QUEUE_CAPACITY".to_string(), "0".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
