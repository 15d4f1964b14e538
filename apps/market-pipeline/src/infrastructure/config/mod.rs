//! Configuration Module
//!
//! Environment-driven configuration for the ingest and stream binaries.

mod settings;

pub use settings::{
    ConfigError, ConsumerSettings, DEFAULT_SYMBOLS, DatabaseSettings, EnvSource, IngestConfig,
    KafkaSettings, ProcessEnv, RedisSettings, StreamConfig, WebSocketSettings, parse_symbols,
};
