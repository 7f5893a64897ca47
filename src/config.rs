//! Hub configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Malformed numeric values fall back to
//! their defaults. An unparsable listen address, an oversized send queue
//! or topics without brokers abort startup.

use std::net::SocketAddr;

use crate::domain::registry::{DEFAULT_SEND_QUEUE_SIZE, MAX_SEND_QUEUE_SIZE};
use crate::error::ConfigError;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8092";
const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";
const DEFAULT_KAFKA_GROUP_ID: &str = "notification-service";
const DEFAULT_KAFKA_TOPICS: &str = "psds.session.created,psds.session.ended,psds.session.operator_joined,psds.operator.assigned";

/// Top-level hub configuration.
///
/// Loaded once at startup via [`HubConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Socket address for the HTTP and WebSocket server.
    pub listen_addr: SocketAddr,

    /// Capacity of each client's outbound queue.
    pub send_queue_size: usize,

    /// Maximum concurrent WebSocket connections per client IP (0 = unlimited).
    pub max_connections_per_ip: usize,

    /// Maximum concurrent WebSocket connections overall (0 = unlimited).
    pub max_connections_total: usize,

    /// Kafka bootstrap servers.
    pub kafka_brokers: Vec<String>,

    /// Kafka consumer group.
    pub kafka_group_id: String,

    /// Topics carrying event envelopes.
    pub kafka_topics: Vec<String>,

    /// Redis server relaying envelopes between hub instances.
    pub redis_url: Option<String>,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl HubConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `LISTEN_ADDR` cannot be parsed, the
    /// send queue is oversized, or topics are configured without brokers.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`HubConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_addr = lookup("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = raw_addr
            .parse()
            .map_err(|source| ConfigError::InvalidListenAddr {
                value: raw_addr.clone(),
                source,
            })?;

        let send_queue_size = match parse_env(&lookup, "WS_SEND_QUEUE_SIZE", DEFAULT_SEND_QUEUE_SIZE) {
            0 => DEFAULT_SEND_QUEUE_SIZE,
            n => n,
        };

        let config = Self {
            listen_addr,
            send_queue_size,
            max_connections_per_ip: parse_env(&lookup, "WS_MAX_CONNECTIONS_PER_IP", 0),
            max_connections_total: parse_env(&lookup, "WS_MAX_CONNECTIONS_TOTAL", 0),
            kafka_brokers: parse_list(&lookup, "KAFKA_BROKERS", DEFAULT_KAFKA_BROKERS),
            kafka_group_id: lookup("KAFKA_GROUP_ID")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_KAFKA_GROUP_ID.to_string()),
            kafka_topics: parse_list(&lookup, "KAFKA_TOPICS", DEFAULT_KAFKA_TOPICS),
            redis_url: lookup("REDIS_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SendQueueTooLarge`] if the queue capacity
    /// exceeds [`MAX_SEND_QUEUE_SIZE`], or [`ConfigError::MissingBrokers`]
    /// if topics are set but brokers are not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_queue_size > MAX_SEND_QUEUE_SIZE {
            return Err(ConfigError::SendQueueTooLarge {
                value: self.send_queue_size,
                max: MAX_SEND_QUEUE_SIZE,
            });
        }
        if self.kafka_brokers.is_empty() && !self.kafka_topics.is_empty() {
            return Err(ConfigError::MissingBrokers);
        }
        Ok(())
    }

    /// Returns `true` when a cross-instance relay is configured.
    #[must_use]
    pub const fn relay_enabled(&self) -> bool {
        self.redis_url.is_some()
    }

    /// Returns `true` when both brokers and topics are configured.
    #[must_use]
    pub fn event_source_enabled(&self) -> bool {
        !self.kafka_brokers.is_empty() && !self.kafka_topics.is_empty()
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a comma-separated list. A variable that is set but blank yields
/// an empty list, so operators can switch a list off explicitly.
fn parse_list<F>(lookup: &F, key: &str, default: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
