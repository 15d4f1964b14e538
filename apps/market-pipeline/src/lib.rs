#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::default_trait_access
    )
)]

//! Market Pipeline - Real-time Stock Market Data Ingestion
//!
//! Two services joined by a durable log. `market-ingest` keeps one
//! WebSocket session to Alpaca and publishes trades and bars to Kafka;
//! `market-stream` consumes them in batches into PostgreSQL and fans
//! each persisted batch out to Redis streams.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: canonical events, symbols, timestamps, batching, backoff
//! - **Application**: ports (log, store, fan-out, batch jobs) and the
//!   publisher, consumer and scheduler services
//! - **Infrastructure**: Alpaca, Kafka, PostgreSQL and Redis adapters,
//!   in-memory adapters, config, health, metrics, telemetry
//!
//! # Data Flow
//!
//! ```text
//! Alpaca WS ──► StreamClient ──mpsc──► EventPublisher ──► Kafka
//!                                                          │
//!            ┌──────────────── StreamConsumer ◄────────────┘
//!            │                       │
//!            ▼                       ▼
//!        PostgreSQL ──then──►  Redis streams ──then──► offset commit
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::DomainError;
pub use domain::backoff::{BackoffConfig, BackoffPolicy};
pub use domain::batch::PendingBatch;
pub use domain::market_data::{Bar, EpochNanos, EventKind, MarketEvent, Symbol, Timeframe, Trade};

// Ports and services
pub use application::ports::{
    BatchJob, EventLogConsumer, EventLogProducer, FanoutPublisher, LogError, LogRecord,
    MarketDataStore, PersistenceError, Topics,
};
pub use application::services::{
    ConsumerConfig, ConsumerStats, EventPublisher, JobScheduler, PublisherStats, StreamConsumer,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestConfig, StreamConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState, HealthSource};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
