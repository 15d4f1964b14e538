//! Market Stream Binary
//!
//! Consumes trades and bars from Kafka in batches, persists them to
//! PostgreSQL and fans persisted events out to Redis streams.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL`, or `DB_PASSWORD` with `DB_HOST`/`DB_PORT`/`DB_NAME`/`DB_USER`
//!
//! ## Optional
//! - `KAFKA_BOOTSTRAP_SERVERS`: broker list (default: localhost:9092)
//! - `KAFKA_TRADES_TOPIC`, `KAFKA_BARS_TOPIC`: topic names
//! - `CONSUMER_GROUP`: consumer group id (default: market-stream-service)
//! - `BATCH_SIZE`: records per flush (default: 100)
//! - `FLUSH_INTERVAL_MS`: maximum batch age (default: 1000)
//! - `DB_MAX_CONNECTIONS`: pool size (default: 5)
//! - `DB_AUTO_MIGRATE`: create the schema on startup (default: true)
//! - `REDIS_ENABLED`, `REDIS_URL`, `REDIS_STREAM_MAXLEN`: fan-out
//! - `PIPELINE_HEALTH_PORT`: health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter

use std::sync::Arc;
use std::time::Duration;

use market_pipeline::application::ports::{FanoutPublisher, NoOpFanout};
use market_pipeline::application::services::{ConsumerConfig, JobScheduler, StreamConsumer};
use market_pipeline::infrastructure::config::RedisSettings;
use market_pipeline::infrastructure::health::{HealthServer, HealthServerState, HealthSource};
use market_pipeline::infrastructure::kafka::KafkaConsumer;
use market_pipeline::infrastructure::postgres::PgMarketDataStore;
use market_pipeline::infrastructure::redis::RedisFanout;
use market_pipeline::infrastructure::telemetry::{self, TelemetryConfig};
use market_pipeline::{StreamConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init(TelemetryConfig::from_env("market-stream"));

    tracing::info!("Starting market stream");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = StreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store =
        PgMarketDataStore::with_max_connections(&config.database.url, config.database.max_connections)
            .await?;
    if config.database.auto_migrate {
        store.migrate().await?;
    }

    let fanout = connect_fanout(&config.redis).await;

    let consumer = KafkaConsumer::new(
        &config.kafka.bootstrap_servers,
        &config.consumer.group_id,
        &config.kafka.topics,
    )?;

    let service = StreamConsumer::new(
        Arc::new(consumer),
        Arc::new(store),
        fanout,
        config.kafka.topics.clone(),
        ConsumerConfig {
            batch_size: config.consumer.batch_size,
            flush_interval: config.consumer.flush_interval,
            ..ConsumerConfig::default()
        },
    );

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION"),
        HealthSource::Stream {
            consumer: service.stats(),
        },
    ));
    let health_server = HealthServer::new(config.health_port, health_state, shutdown_token.clone());

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Batch ETL jobs register here; none ship with this service.
    let scheduler = JobScheduler::new();
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_token.clone()));

    let consumer_task = tokio::spawn(service.run(shutdown_token.clone()));

    tracing::info!("Market stream ready");

    await_signal().await;
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = consumer_task.await;
        let _ = scheduler_task.await;
    })
    .await;

    if drained.is_err() {
        tracing::warn!("Shutdown timed out, uncommitted records will be redelivered");
    } else {
        tracing::info!("Market stream stopped");
    }

    Ok(())
}

/// Build the fan-out publisher. Fan-out is best effort, so a Redis that is
/// unreachable at startup disables it instead of stopping the service.
async fn connect_fanout(settings: &RedisSettings) -> Arc<dyn FanoutPublisher> {
    if !settings.enabled {
        tracing::info!("Redis fan-out disabled");
        return Arc::new(NoOpFanout);
    }

    match RedisFanout::connect(&settings.url, settings.stream_maxlen).await {
        Ok(fanout) => {
            tracing::info!(maxlen = settings.stream_maxlen, "Redis fan-out connected");
            Arc::new(fanout)
        }
        Err(e) => {
            tracing::error!(error = %e, "Redis unavailable, fan-out disabled");
            Arc::new(NoOpFanout)
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        bootstrap_servers = %config.kafka.bootstrap_servers,
        group_id = %config.consumer.group_id,
        batch_size = config.consumer.batch_size,
        flush_interval_ms = config.consumer.flush_interval.as_millis(),
        redis_enabled = config.redis.enabled,
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(database = ?config.database, "Database settings");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
#[allow(clippy::expect_used)]
async fn await_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
