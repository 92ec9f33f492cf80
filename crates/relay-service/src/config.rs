//! Signaling relay configuration.
//!
//! Configuration is loaded from environment variables. Every variable has a
//! default, so an empty environment yields a working local setup.

use crate::rooms::{SessionLimits, DEFAULT_CONNECTION_BUFFER};
use crate::rooms::session::{DEFAULT_MAX_CACHED_TRACKS, DEFAULT_MAX_PENDING_MESSAGES};
use crate::tasks::EvictionConfig;
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default API + signaling bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health + metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default path prefix for API and signaling routes.
pub const DEFAULT_API_PREFIX: &str = "/watchparty/api";

/// Default header carrying the pre-verified user ID.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-authenticated-user";

/// Default eviction sweep interval in seconds (5 minutes).
pub const DEFAULT_EVICTION_INTERVAL_SECONDS: u64 = 300;

/// Default max idle time in seconds (12 hours).
pub const DEFAULT_MAX_IDLE_SECONDS: u64 = 43_200;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue(format!(
                "RELAY_LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Signaling relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API + WebSocket listener.
    pub bind_address: SocketAddr,

    /// Health + metrics listener.
    pub health_bind_address: SocketAddr,

    /// Prefix for API and signaling routes (default: "/watchparty/api").
    pub api_prefix: String,

    /// Header set by the fronting proxy with the authenticated user ID.
    pub identity_header: String,

    /// Time between eviction sweeps.
    pub eviction_interval: Duration,

    /// Rooms idle longer than this are evicted.
    pub max_idle: Duration,

    /// Per-peer pending queue cap.
    pub max_pending_messages: usize,

    /// Per-direction cap on distinct cached track types.
    pub max_cached_tracks: usize,

    /// Outbound channel capacity per connection.
    pub connection_buffer: usize,

    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            health_bind_address: SocketAddr::from(([0, 0, 0, 0], 8081)),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            eviction_interval: Duration::from_secs(DEFAULT_EVICTION_INTERVAL_SECONDS),
            max_idle: Duration::from_secs(DEFAULT_MAX_IDLE_SECONDS),
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            max_cached_tracks: DEFAULT_MAX_CACHED_TRACKS,
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = parse_addr(vars, "RELAY_BIND_ADDRESS", DEFAULT_BIND_ADDRESS)?;
        let health_bind_address =
            parse_addr(vars, "RELAY_HEALTH_BIND_ADDRESS", DEFAULT_HEALTH_BIND_ADDRESS)?;

        let api_prefix = vars
            .get("RELAY_API_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_PREFIX.to_string());
        if !api_prefix.starts_with('/') || api_prefix.ends_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_API_PREFIX must start with '/' and not end with '/', got '{api_prefix}'"
            )));
        }

        let identity_header = vars
            .get("RELAY_IDENTITY_HEADER")
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_IDENTITY_HEADER.to_string());
        if identity_header.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "RELAY_IDENTITY_HEADER must not be empty".to_string(),
            ));
        }

        let eviction_interval = Duration::from_secs(parse_positive(
            vars,
            "RELAY_EVICTION_INTERVAL_SECONDS",
            DEFAULT_EVICTION_INTERVAL_SECONDS,
        )?);
        let max_idle = Duration::from_secs(parse_positive(
            vars,
            "RELAY_MAX_IDLE_SECONDS",
            DEFAULT_MAX_IDLE_SECONDS,
        )?);

        let max_pending_messages = parse_positive(
            vars,
            "RELAY_MAX_PENDING_MESSAGES",
            DEFAULT_MAX_PENDING_MESSAGES,
        )?;
        let max_cached_tracks =
            parse_positive(vars, "RELAY_MAX_CACHED_TRACKS", DEFAULT_MAX_CACHED_TRACKS)?;
        let connection_buffer =
            parse_positive(vars, "RELAY_CONNECTION_BUFFER", DEFAULT_CONNECTION_BUFFER)?;

        let required = SessionLimits {
            max_pending_messages,
            max_cached_tracks,
        }
        .required_connection_buffer();
        if connection_buffer < required {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_CONNECTION_BUFFER must be at least RELAY_MAX_PENDING_MESSAGES + \
                 2 * RELAY_MAX_CACHED_TRACKS ({required}), got {connection_buffer}"
            )));
        }

        let log_format = match vars.get("RELAY_LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::default(),
        };

        Ok(Config {
            bind_address,
            health_bind_address,
            api_prefix,
            identity_header,
            eviction_interval,
            max_idle,
            max_pending_messages,
            max_cached_tracks,
            connection_buffer,
            log_format,
        })
    }

    #[must_use]
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_pending_messages: self.max_pending_messages,
            max_cached_tracks: self.max_cached_tracks,
        }
    }

    #[must_use]
    pub fn eviction(&self) -> EvictionConfig {
        EvictionConfig {
            interval: self.eviction_interval,
            max_idle: self.max_idle,
        }
    }
}

fn parse_addr(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<SocketAddr, ConfigError> {
    let value = vars.get(name).map(String::as_str).unwrap_or(default);
    value.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a socket address like 0.0.0.0:8080, got '{value}': {e}"
        ))
    })
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(value)
}
