//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports, plus the process
//! plumbing (configuration, health, metrics, tracing) shared by both
//! binaries.

/// Alpaca WebSocket stream client.
pub mod alpaca;

/// Environment-driven configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Kafka producer and consumer-group adapters.
pub mod kafka;

/// In-process adapters for tests and local runs.
pub mod memory;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// PostgreSQL market data store.
pub mod postgres;

/// Redis stream fan-out.
pub mod redis;

/// Tracing subscriber and OTLP export.
pub mod telemetry;
