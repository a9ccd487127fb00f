//! Session Router configuration.
//!
//! Configuration is loaded from environment variables. Unparseable numeric
//! values fall back to their defaults; structurally invalid values are
//! rejected.

use crate::engine::{TransportListenConfig, WorkerSettings};
use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use thiserror::Error;

/// Default WebSocket signaling bind address.
pub const DEFAULT_WS_BIND_ADDRESS: &str = "0.0.0.0:4000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default transport listen IP.
pub const DEFAULT_LISTEN_IP: &str = "127.0.0.1";

/// Default lower bound of the worker RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40000;

/// Default upper bound of the worker RTC port range.
pub const DEFAULT_RTC_MAX_PORT: u16 = 49999;

/// Default maximum number of concurrent rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default maximum number of peers per room.
pub const DEFAULT_MAX_PEERS_PER_ROOM: usize = 100;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "sr";

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_VAR: &str = "SR_LOG_FORMAT";

/// Log output format: human-readable text or one JSON object per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue(format!(
                "{LOG_FORMAT_VAR} must be `text` or `json`, got `{other}`"
            ))),
        }
    }

    /// Read the format before the rest of the configuration, so logging can
    /// start first. An invalid value falls back to text here and is reported
    /// by [`Config::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        env::var(LOG_FORMAT_VAR)
            .ok()
            .and_then(|value| Self::parse(&value).ok())
            .unwrap_or_default()
    }
}

/// Session Router configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket signaling listener (default: "0.0.0.0:4000").
    pub ws_bind_address: String,

    /// Health and metrics listener (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// IP that transports listen on.
    pub listen_ip: IpAddr,

    /// Public IP announced in ICE candidates instead of `listen_ip`.
    pub announced_ip: Option<IpAddr>,

    /// Worker RTC port range, inclusive.
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,

    /// Maximum concurrent rooms.
    pub max_rooms: usize,

    /// Maximum peers in one room.
    pub max_peers_per_room: usize,

    pub log_format: LogFormat,
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
        let ws_bind_address = vars
            .get("SR_WS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SR_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let listen_ip = parse_ip(
            "SR_LISTEN_IP",
            vars.get("SR_LISTEN_IP")
                .map_or(DEFAULT_LISTEN_IP, String::as_str),
        )?;

        let announced_ip = vars
            .get("SR_ANNOUNCED_IP")
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_ip("SR_ANNOUNCED_IP", s))
            .transpose()?;

        let rtc_min_port = vars
            .get("SR_RTC_MIN_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RTC_MIN_PORT);

        let rtc_max_port = vars
            .get("SR_RTC_MAX_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RTC_MAX_PORT);

        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "SR_RTC_MIN_PORT ({rtc_min_port}) must not exceed SR_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let max_rooms = vars
            .get("SR_MAX_ROOMS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ROOMS);

        let max_peers_per_room = vars
            .get("SR_MAX_PEERS_PER_ROOM")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_PEERS_PER_ROOM);

        let log_format = vars
            .get(LOG_FORMAT_VAR)
            .map(|s| LogFormat::parse(s))
            .transpose()?
            .unwrap_or_default();

        let instance_id = vars.get("SR_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            ws_bind_address,
            health_bind_address,
            instance_id,
            listen_ip,
            announced_ip,
            rtc_min_port,
            rtc_max_port,
            max_rooms,
            max_peers_per_room,
            log_format,
        })
    }

    /// Settings for the process's media worker.
    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            rtc_min_port: self.rtc_min_port,
            rtc_max_port: self.rtc_max_port,
        }
    }

    /// Listen configuration applied to every WebRTC transport.
    #[must_use]
    pub fn transport_listen_config(&self) -> TransportListenConfig {
        TransportListenConfig::new(self.listen_ip, self.announced_ip)
    }
}

fn parse_ip(name: &str, value: &str) -> Result<IpAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{name} is not an IP address: {value}")))
}
