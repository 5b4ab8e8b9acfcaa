use clap::Parser;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_common::configs::local_hostname;
use lib_common::{AmbassadorSettings, StoreSettings};

/// A configuration assembled from defaults, an optional JSON file and the
/// command line / environment, later layers overriding earlier ones.
pub trait Layered: Parser + DeserializeOwned + Sized {
    /// Built-in defaults.
    fn defaults() -> Self;
    /// Merge two layers, where `other` overrides `self` for `Some` values.
    fn merge(self, other: Self) -> Self;
    /// Config file requested on the command line or environment.
    fn config_path(&self) -> Option<&Path>;
    /// Config file read when none is requested.
    fn default_config_file() -> &'static str;
}

/// Loads defaults < config file < environment and CLI.
pub fn load_config<C: Layered>() -> C {
    let cli = C::parse();
    let config_file_path = cli
        .config_path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(C::default_config_file()));

    let mut current = C::defaults();
    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path).map(|s| serde_json::from_str::<C>(&s)) {
            Ok(Ok(file_config)) => current = current.merge(file_config),
            Ok(Err(e)) => eprintln!("Failed to parse config file {}: {e}. Falling back to other sources.", config_file_path.display()),
            Err(e) => eprintln!("Failed to read config file {}: {e}. Falling back to other sources.", config_file_path.display()),
        }
    }
    current.merge(cli)
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Disaster alert relay: broker -> store -> WebSocket dashboards", version)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[clap(long, env = "RELAY_PORT", help = "Port for the HTTP and WebSocket listener.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "BACKEND_NAME", help = "Instance name reported by /instancia and /quien-soy.")]
    pub backend_name: Option<String>,

    #[clap(long, env = "MQTT_HOST", help = "MQTT broker host.")]
    pub mqtt_host: Option<String>,

    #[clap(long, env = "MQTT_PORT", help = "MQTT broker port.")]
    pub mqtt_port: Option<u16>,

    #[clap(long, env = "MQTT_TOPIC", help = "Topic filter carrying the alerts.")]
    pub mqtt_topic: Option<String>,

    #[clap(long, env = "AMBASSADOR_EVENT_LOG", help = "Structured event log file.")]
    pub event_log: Option<PathBuf>,

    #[clap(long, env = "DB_HOST", help = "PostgreSQL host.")]
    pub db_host: Option<String>,

    #[clap(long, env = "DB_PORT", help = "PostgreSQL port.")]
    pub db_port: Option<u16>,

    #[clap(long, env = "DB_NAME", help = "PostgreSQL database name.")]
    pub db_name: Option<String>,

    #[clap(long, env = "DB_USER", help = "PostgreSQL user.")]
    pub db_user: Option<String>,

    #[clap(long, env = "DB_PASSWORD", help = "PostgreSQL password.")]
    pub db_password: Option<String>,

    #[clap(long, env = "RELAY_MEMORY_STORE", help = "Keep alerts in memory instead of PostgreSQL (true/false).")]
    pub memory_store: Option<bool>,

    #[clap(long, env = "RELAY_MEMORY_BROKER", help = "Use the in-process loopback broker instead of MQTT (true/false).")]
    pub memory_broker: Option<bool>,
}

impl Layered for RelayConfig {
    fn defaults() -> Self {
        let store = StoreSettings::default();
        Self {
            port: Some(8000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            mqtt_host: Some("mosquitto".to_string()),
            mqtt_port: Some(1883),
            mqtt_topic: Some("alertas/general".to_string()),
            db_host: Some(store.host),
            db_port: Some(store.port),
            db_name: Some(store.database),
            db_user: Some(store.user),
            memory_store: Some(false),
            memory_broker: Some(false),
            ..Default::default()
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            backend_name: other.backend_name.or(self.backend_name),
            mqtt_host: other.mqtt_host.or(self.mqtt_host),
            mqtt_port: other.mqtt_port.or(self.mqtt_port),
            mqtt_topic: other.mqtt_topic.or(self.mqtt_topic),
            event_log: other.event_log.or(self.event_log),
            db_host: other.db_host.or(self.db_host),
            db_port: other.db_port.or(self.db_port),
            db_name: other.db_name.or(self.db_name),
            db_user: other.db_user.or(self.db_user),
            db_password: other.db_password.or(self.db_password),
            memory_store: other.memory_store.or(self.memory_store),
            memory_broker: other.memory_broker.or(self.memory_broker),
        }
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn default_config_file() -> &'static str {
        "relay_backend.conf"
    }
}

impl RelayConfig {
    pub fn ambassador_settings(&self) -> AmbassadorSettings {
        let defaults = AmbassadorSettings::default();
        AmbassadorSettings {
            broker_host: self.mqtt_host.clone().unwrap_or(defaults.broker_host.clone()),
            broker_port: self.mqtt_port.unwrap_or(defaults.broker_port),
            event_log_path: self.event_log.clone().or(defaults.event_log_path.clone()),
            ..defaults
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        let defaults = StoreSettings::default();
        StoreSettings {
            host: self.db_host.clone().unwrap_or(defaults.host.clone()),
            port: self.db_port.unwrap_or(defaults.port),
            database: self.db_name.clone().unwrap_or(defaults.database.clone()),
            user: self.db_user.clone().unwrap_or(defaults.user.clone()),
            password: self.db_password.clone().unwrap_or_default(),
            ..defaults
        }
    }

    /// Name reported by `/instancia`; falls back to the host name.
    pub fn instance_name(&self) -> String {
        self.backend_name.clone().unwrap_or_else(local_hostname)
    }

    pub fn topic(&self) -> String {
        self.mqtt_topic.clone().unwrap_or_else(|| "alertas/general".to_string())
    }
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "MQTT ambassador with health, metrics and publish endpoints", version)]
#[serde(rename_all = "camelCase")]
pub struct AmbassadorConfig {
    #[clap(long, env = "AMBASSADOR_PORT", help = "Port for the HTTP listener.")]
    pub port: Option<u16>,

    #[clap(long, env = "AMBASSADOR_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "AMBASSADOR_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "AMBASSADOR_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "MQTT_HOST", help = "MQTT broker host.")]
    pub mqtt_host: Option<String>,

    #[clap(long, env = "MQTT_PORT", help = "MQTT broker port.")]
    pub mqtt_port: Option<u16>,

    #[clap(long, env = "AMBASSADOR_EVENT_LOG", help = "Structured event log file.")]
    pub event_log: Option<PathBuf>,

    #[clap(long, env = "AMBASSADOR_RATE_LIMIT", help = "Messages admitted per second.")]
    pub rate_limit: Option<usize>,

    #[clap(long, env = "AMBASSADOR_FAILURE_THRESHOLD", help = "Consecutive connect failures that open the circuit.")]
    pub failure_threshold: Option<u32>,

    #[clap(long, env = "AMBASSADOR_OPEN_TIMEOUT_SECONDS", help = "Seconds the open circuit rejects attempts.")]
    pub open_timeout_seconds: Option<u64>,
}

impl Layered for AmbassadorConfig {
    fn defaults() -> Self {
        Self {
            port: Some(8080),
            log_level: Some("info".to_string()),
            mqtt_host: Some("mosquitto".to_string()),
            mqtt_port: Some(1883),
            ..Default::default()
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            mqtt_host: other.mqtt_host.or(self.mqtt_host),
            mqtt_port: other.mqtt_port.or(self.mqtt_port),
            event_log: other.event_log.or(self.event_log),
            rate_limit: other.rate_limit.or(self.rate_limit),
            failure_threshold: other.failure_threshold.or(self.failure_threshold),
            open_timeout_seconds: other.open_timeout_seconds.or(self.open_timeout_seconds),
        }
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn default_config_file() -> &'static str {
        "ambassador_service.conf"
    }
}

impl AmbassadorConfig {
    pub fn ambassador_settings(&self) -> AmbassadorSettings {
        let defaults = AmbassadorSettings::default();
        AmbassadorSettings {
            broker_host: self.mqtt_host.clone().unwrap_or(defaults.broker_host.clone()),
            broker_port: self.mqtt_port.unwrap_or(defaults.broker_port),
            event_log_path: self.event_log.clone().or(defaults.event_log_path.clone()),
            rate_limit: self.rate_limit.unwrap_or(defaults.rate_limit),
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            open_timeout: self
                .open_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.open_timeout),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_override_earlier_ones() {
        let file: RelayConfig = serde_json::from_str(r#"{"port": 9000, "mqttTopic": "alertas/#"}"#).unwrap();
        let cli = RelayConfig {
            port: Some(9100),
            ..Default::default()
        };
        let merged = RelayConfig::defaults().merge(file).merge(cli);
        assert_eq!(merged.port, Some(9100));
        assert_eq!(merged.topic(), "alertas/#");
        assert_eq!(merged.mqtt_host.as_deref(), Some("mosquitto"));
    }

    #[test]
    fn settings_carry_the_configured_values() {
        let config = AmbassadorConfig {
            mqtt_host: Some("broker.local".to_string()),
            rate_limit: Some(25),
            open_timeout_seconds: Some(5),
            ..AmbassadorConfig::defaults()
        };
        let settings = config.ambassador_settings();
        assert_eq!(settings.broker_host, "broker.local");
        assert_eq!(settings.rate_limit, 25);
        assert_eq!(settings.open_timeout, Duration::from_secs(5));
        assert_eq!(settings.failure_threshold, 5);

        let store = RelayConfig::defaults().store_settings();
        assert_eq!(store.database, "adn_alert_db");
        assert_eq!(store.max_attempts, 10);
    }
}
