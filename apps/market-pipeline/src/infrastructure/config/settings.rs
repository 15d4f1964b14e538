//! Pipeline Configuration Settings
//!
//! Configuration for both binaries, loaded from environment variables.
//! Malformed numeric and boolean values fall back to their defaults;
//! missing secrets are errors.

use std::collections::HashMap;
use std::time::Duration;

use crate::application::ports::Topics;
use crate::domain::backoff::BackoffConfig;
use crate::domain::market_data::Symbol;
use crate::infrastructure::alpaca::{Credentials, DEFAULT_STREAM_URL, HeartbeatConfig};
use crate::infrastructure::kafka::{DEFAULT_CONSUMER_GROUP, DEFAULT_MESSAGE_TIMEOUT};
use crate::infrastructure::redis::DEFAULT_STREAM_MAXLEN;

/// Symbols subscribed when `SUBSCRIBE_SYMBOLS` is unset.
pub const DEFAULT_SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "GOOGL"];

/// Environment lookup: the process environment or a fixed map.
pub trait EnvSource {
    /// Value of `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

// =============================================================================
// Section Settings
// =============================================================================

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(20),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl WebSocketSettings {
    /// Reconnect backoff.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_delay_initial,
            max_delay: self.reconnect_delay_max,
            multiplier: self.reconnect_delay_multiplier,
            max_attempts: self.max_reconnect_attempts,
            ..BackoffConfig::default()
        }
    }

    /// Heartbeat timing.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            ping_interval: self.heartbeat_interval,
            pong_timeout: self.heartbeat_timeout,
        }
    }
}

/// Durable log settings.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Broker list.
    pub bootstrap_servers: String,
    /// Topic names.
    pub topics: Topics,
    /// Delivery bound for one record.
    pub message_timeout: Duration,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topics: Topics::default(),
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
        }
    }
}

/// Consumer group and batching settings.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Consumer group id.
    pub group_id: String,
    /// Records per flush.
    pub batch_size: usize,
    /// Maximum age of a non-empty batch.
    pub flush_interval: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group_id: DEFAULT_CONSUMER_GROUP.to_string(),
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Relational store settings.
#[derive(Clone)]
pub struct DatabaseSettings {
    /// Connection URL, composed from parts when `DATABASE_URL` is unset.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
    /// Create the schema on startup.
    pub auto_migrate: bool,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("auto_migrate", &self.auto_migrate)
            .finish()
    }
}

/// Fan-out settings.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Publish to Redis at all.
    pub enabled: bool,
    /// Redis URL.
    pub url: String,
    /// Approximate stream length cap.
    pub stream_maxlen: usize,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379".to_string(),
            stream_maxlen: DEFAULT_STREAM_MAXLEN,
        }
    }
}

// =============================================================================
// Binary Configurations
// =============================================================================

/// `market-ingest` configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Feed credentials.
    pub credentials: Credentials,
    /// Feed WebSocket URL.
    pub stream_url: String,
    /// Subscribed symbols.
    pub symbols: Vec<String>,
    /// Subscribe to corrected bars.
    pub updated_bars: bool,
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Durable log settings.
    pub kafka: KafkaSettings,
    /// Bound of the feed-to-publisher queue.
    pub publisher_queue_capacity: usize,
    /// Health server port.
    pub health_port: u16,
}

impl IngestConfig {
    /// Default health port.
    pub const DEFAULT_HEALTH_PORT: u16 = 8082;

    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or symbols are invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    /// Load from any environment source.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or symbols are invalid.
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let api_key = required(env, "ALPACA_API_KEY")?;
        let api_secret = required(env, "ALPACA_SECRET_KEY")?;
        let credentials = Credentials::new(api_key, api_secret).map_err(|e| {
            ConfigError::InvalidValue {
                key: "ALPACA_API_KEY".to_string(),
                message: e.to_string(),
            }
        })?;

        let symbols = match non_empty(env, "SUBSCRIBE_SYMBOLS") {
            Some(raw) => parse_symbols(&raw)?,
            None => DEFAULT_SYMBOLS.iter().map(ToString::to_string).collect(),
        };

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: parse_env_duration_secs(
                env,
                "ALPACA_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                env,
                "ALPACA_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                env,
                "ALPACA_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                env,
                "ALPACA_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env(
                env,
                "ALPACA_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env(
                env,
                "ALPACA_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        Ok(Self {
            credentials,
            stream_url: non_empty(env, "ALPACA_WS_URL")
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            symbols,
            updated_bars: parse_env_bool(env, "ALPACA_UPDATED_BARS", true),
            websocket,
            kafka: kafka_settings(env),
            publisher_queue_capacity: parse_env(env, "PUBLISHER_QUEUE_CAPACITY", 10_000).max(1),
            health_port: parse_env(env, "PIPELINE_HEALTH_PORT", Self::DEFAULT_HEALTH_PORT),
        })
    }
}

/// `market-stream` configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Durable log settings.
    pub kafka: KafkaSettings,
    /// Consumer settings.
    pub consumer: ConsumerSettings,
    /// Relational store settings.
    pub database: DatabaseSettings,
    /// Fan-out settings.
    pub redis: RedisSettings,
    /// Health server port.
    pub health_port: u16,
}

impl StreamConfig {
    /// Default health port.
    pub const DEFAULT_HEALTH_PORT: u16 = 8083;

    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `DATABASE_URL` nor `DB_PASSWORD` is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    /// Load from any environment source.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `DATABASE_URL` nor `DB_PASSWORD` is set.
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let consumer_defaults = ConsumerSettings::default();
        let consumer = ConsumerSettings {
            group_id: non_empty(env, "CONSUMER_GROUP").unwrap_or(consumer_defaults.group_id),
            batch_size: parse_env(env, "BATCH_SIZE", consumer_defaults.batch_size).max(1),
            flush_interval: parse_env_duration_millis(
                env,
                "FLUSH_INTERVAL_MS",
                consumer_defaults.flush_interval,
            ),
        };

        let database = DatabaseSettings {
            url: database_url(env)?,
            max_connections: parse_env(env, "DB_MAX_CONNECTIONS", 5).max(1),
            auto_migrate: parse_env_bool(env, "DB_AUTO_MIGRATE", true),
        };

        let redis_defaults = RedisSettings::default();
        let redis = RedisSettings {
            enabled: parse_env_bool(env, "REDIS_ENABLED", redis_defaults.enabled),
            url: non_empty(env, "REDIS_URL").unwrap_or(redis_defaults.url),
            stream_maxlen: parse_env(env, "REDIS_STREAM_MAXLEN", redis_defaults.stream_maxlen),
        };

        Ok(Self {
            kafka: kafka_settings(env),
            consumer,
            database,
            redis,
            health_port: parse_env(env, "PIPELINE_HEALTH_PORT", Self::DEFAULT_HEALTH_PORT),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be interpreted.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong.
        message: String,
    },
}

// =============================================================================
// Parsing Helpers
// =============================================================================

/// Parse a symbol list given as CSV (`AAPL,MSFT`) or a JSON array.
/// Symbols are normalized and de-duplicated in first-seen order.
///
/// # Errors
///
/// Returns an error for malformed JSON, an invalid symbol, or an empty list.
pub fn parse_symbols(raw: &str) -> Result<Vec<String>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "SUBSCRIBE_SYMBOLS".to_string(),
        message,
    };

    let trimmed = raw.trim();
    let items: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| invalid(e.to_string()))?
    } else {
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    };

    let mut symbols = Vec::with_capacity(items.len());
    for item in items {
        let symbol = Symbol::new(&item).map_err(|e| invalid(e.to_string()))?;
        let symbol = String::from(symbol);
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        return Err(invalid("no symbols given".to_string()));
    }
    Ok(symbols)
}

fn kafka_settings(env: &impl EnvSource) -> KafkaSettings {
    let defaults = KafkaSettings::default();
    KafkaSettings {
        bootstrap_servers: non_empty(env, "KAFKA_BOOTSTRAP_SERVERS")
            .unwrap_or(defaults.bootstrap_servers),
        topics: Topics {
            trades: non_empty(env, "KAFKA_TRADES_TOPIC").unwrap_or(defaults.topics.trades),
            bars: non_empty(env, "KAFKA_BARS_TOPIC").unwrap_or(defaults.topics.bars),
        },
        message_timeout: parse_env_duration_millis(
            env,
            "KAFKA_MESSAGE_TIMEOUT_MS",
            defaults.message_timeout,
        ),
    }
}

fn database_url(env: &impl EnvSource) -> Result<String, ConfigError> {
    if let Some(url) = non_empty(env, "DATABASE_URL") {
        return Ok(url);
    }

    let password = required(env, "DB_PASSWORD")?;
    let host = non_empty(env, "DB_HOST").unwrap_or_else(|| "localhost".to_string());
    let port: u16 = parse_env(env, "DB_PORT", 5432);
    let name = non_empty(env, "DB_NAME").unwrap_or_else(|| "market_data".to_string());
    let user = non_empty(env, "DB_USER").unwrap_or_else(|| "postgres".to_string());

    Ok(format!(
        "postgres://{}:{}@{host}:{port}/{name}",
        percent_encode(&user),
        percent_encode(&password)
    ))
}

/// Percent-encode a URL userinfo component.
fn percent_encode(raw: &str) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn required(env: &impl EnvSource, key: &str) -> Result<String, ConfigError> {
    let value = env
        .get(key)
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn non_empty(env: &impl EnvSource, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(env: &impl EnvSource, key: &str, default: T) -> T {
    env.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(env: &impl EnvSource, key: &str, default: bool) -> bool {
    match env.get(key).map(|v| v.trim().to_lowercase()).as_deref() {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

fn parse_env_duration_secs(env: &impl EnvSource, key: &str, default: Duration) -> Duration {
    env.get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(env: &impl EnvSource, key: &str, default: Duration) -> Duration {
    env.get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
