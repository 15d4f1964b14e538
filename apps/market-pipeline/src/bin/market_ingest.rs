//! Market Ingest Binary
//!
//! Streams trades and bars from the Alpaca WebSocket feed into Kafka.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_API_KEY`: Alpaca API key
//! - `ALPACA_SECRET_KEY`: Alpaca API secret
//!
//! ## Optional
//! - `ALPACA_WS_URL`: feed URL (default: IEX stock stream)
//! - `SUBSCRIBE_SYMBOLS`: comma-separated or JSON list of tickers
//! - `ALPACA_UPDATED_BARS`: also subscribe to corrected bars (default: true)
//! - `ALPACA_HEARTBEAT_*`, `ALPACA_RECONNECT_*`: connection timing
//! - `KAFKA_BOOTSTRAP_SERVERS`: broker list (default: localhost:9092)
//! - `KAFKA_TRADES_TOPIC`, `KAFKA_BARS_TOPIC`: topic names
//! - `PUBLISHER_QUEUE_CAPACITY`: feed-to-publisher queue bound (default: 10000)
//! - `PIPELINE_HEALTH_PORT`: health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter

use std::sync::Arc;
use std::time::Duration;

use market_pipeline::application::services::EventPublisher;
use market_pipeline::infrastructure::alpaca::{FeedState, StreamClient, StreamClientConfig};
use market_pipeline::infrastructure::health::{HealthServer, HealthServerState, HealthSource};
use market_pipeline::infrastructure::kafka::KafkaProducer;
use market_pipeline::infrastructure::telemetry::{self, TelemetryConfig};
use market_pipeline::{IngestConfig, MarketEvent, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init(TelemetryConfig::from_env("market-ingest"));

    tracing::info!("Starting market ingest");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = IngestConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let producer = Arc::new(KafkaProducer::new(
        &config.kafka.bootstrap_servers,
        config.kafka.message_timeout,
    )?);
    let publisher = EventPublisher::new(producer, config.kafka.topics.clone());
    let publisher_stats = publisher.stats();

    let (event_tx, event_rx) = mpsc::channel::<MarketEvent>(config.publisher_queue_capacity);
    let feed_state = Arc::new(FeedState::new());

    let client_config = StreamClientConfig {
        updated_bars: config.updated_bars,
        backoff: config.websocket.backoff(),
        heartbeat: config.websocket.heartbeat(),
        ..StreamClientConfig::new(
            config.stream_url.clone(),
            config.credentials.clone(),
            config.symbols.clone(),
        )
    };
    let client = Arc::new(StreamClient::new(
        client_config,
        event_tx,
        Arc::clone(&feed_state),
        shutdown_token.clone(),
    ));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION"),
        HealthSource::Ingest {
            feed: feed_state,
            publisher: publisher_stats,
        },
    ));
    let health_server = HealthServer::new(config.health_port, health_state, shutdown_token.clone());

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let publisher_task = tokio::spawn(publisher.run(event_rx, shutdown_token.clone()));

    let client_cancel = shutdown_token.clone();
    let client_task = tokio::spawn(async move {
        let result = client.run().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Stream client stopped");
        }
        client_cancel.cancel();
        result
    });

    tracing::info!("Market ingest ready");

    tokio::select! {
        () = await_signal() => {}
        () = shutdown_token.cancelled() => {
            tracing::warn!("Stream client exited, shutting down");
        }
    }
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let client_result = client_task.await;
        let _ = publisher_task.await;
        client_result
    })
    .await;

    match drained {
        Ok(Ok(Err(e))) if e.is_fatal() => {
            tracing::error!(error = %e, "Market ingest stopped on fatal error");
            return Err(e.into());
        }
        Ok(_) => tracing::info!("Market ingest stopped"),
        Err(_) => tracing::warn!("Shutdown timed out with events still queued"),
    }

    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        symbols = config.symbols.len(),
        bootstrap_servers = %config.kafka.bootstrap_servers,
        trades_topic = %config.kafka.topics.trades,
        bars_topic = %config.kafka.topics.bars,
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(stream_url = %config.stream_url, symbols = ?config.symbols, "Feed endpoint");
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
