//! # Component Settings
//!
//! Typed settings for the ambassador and the alert store. The servers build
//! these from their layered CLI/env/file configuration; tests build them
//! directly and shorten the timeouts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::circuit_breaker::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_TIMEOUT};
use crate::core::rate_limiter::DEFAULT_RATE_LIMIT;

/// Default location of the structured event log read by the log processor.
pub const DEFAULT_EVENT_LOG_PATH: &str = "/var/log/mqtt/ambassador.log";

/// # Ambassador Settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbassadorSettings {
    /// Broker host name or address.
    pub broker_host: String,
    /// Broker TCP port.
    pub broker_port: u16,
    /// Client identifier presented to the broker and stamped on event records.
    pub client_id: String,
    /// MQTT keep-alive, also the upper bound for broker I/O.
    pub keep_alive: Duration,
    /// How long a single connect attempt may wait for the broker's CONNACK.
    pub connect_timeout: Duration,
    /// Consecutive connect failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the open circuit rejects attempts.
    pub open_timeout: Duration,
    /// Messages admitted per second, inbound and outbound combined.
    pub rate_limit: usize,
    /// Pause between supervised reconnect attempts.
    pub reconnect_interval: Duration,
    /// Structured event log file. `None` keeps events in tracing only.
    pub event_log_path: Option<PathBuf>,
}

impl Default for AmbassadorSettings {
    fn default() -> Self {
        Self {
            broker_host: "mosquitto".to_string(),
            broker_port: 1883,
            client_id: format!("ambassador-{}", local_hostname()),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(60),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            rate_limit: DEFAULT_RATE_LIMIT,
            reconnect_interval: Duration::from_secs(5),
            event_log_path: Some(PathBuf::from(DEFAULT_EVENT_LOG_PATH)),
        }
    }
}

impl AmbassadorSettings {
    /// `host:port` label used in logs and event records.
    pub fn broker_label(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}

/// # Store Settings
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Connection attempts made at startup before giving up.
    pub max_attempts: u32,
    /// Pause between startup connection attempts.
    pub retry_pause: Duration,
    /// Upper bound for one connection attempt.
    pub acquire_timeout: Duration,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            host: "postgres".to_string(),
            port: 5432,
            database: "adn_alert_db".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_attempts: 10,
            retry_pause: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(3),
            max_connections: 5,
        }
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"*****")
            .field("max_attempts", &self.max_attempts)
            .field("retry_pause", &self.retry_pause)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Host name of this machine, `"unknown"` when it cannot be read.
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployment() {
        let ambassador = AmbassadorSettings::default();
        assert_eq!(ambassador.failure_threshold, 5);
        assert_eq!(ambassador.open_timeout, Duration::from_secs(30));
        assert_eq!(ambassador.rate_limit, 10);
        assert!(ambassador.client_id.starts_with("ambassador-"));
        assert_eq!(ambassador.broker_label(), "mosquitto:1883");

        let store = StoreSettings::default();
        assert_eq!(store.max_attempts, 10);
        assert_eq!(store.retry_pause, Duration::from_secs(1));
    }

    #[test]
    fn debug_output_masks_the_password() {
        let store = StoreSettings {
            password: "contraseña".to_string(),
            ..StoreSettings::default()
        };
        let printed = format!("{store:?}");
        assert!(!printed.contains("contraseña"));
        assert!(printed.contains("*****"));
    }
}
