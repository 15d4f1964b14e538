//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for container probes and Prometheus scraping. Each
//! binary runs one server describing its own stage of the pipeline.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ConsumerStats, PublisherStats};
use crate::infrastructure::alpaca::{ConnectionState, FeedState};
use crate::infrastructure::metrics::get_metrics_handle;

/// Consecutive flush failures after which the stream stage reports unhealthy.
pub const UNHEALTHY_FAILURE_STREAK: u64 = 5;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Which pipeline stage answered.
    pub service: &'static str,
    /// Crate version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed, for the ingest stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<FeedInfo>,
    /// Log publisher, for the ingest stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<PublisherInfo>,
    /// Log consumer, for the stream stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ConsumerInfo>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Working, but reconnecting or retrying.
    Degraded,
    /// Not moving data.
    Unhealthy,
}

/// Upstream feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether data messages are flowing.
    pub dispatching: bool,
    /// Most recent time the feed reached `dispatching`.
    pub last_dispatching_at: Option<DateTime<Utc>>,
    /// Last connection error, cleared on recovery.
    pub last_error: Option<String>,
    /// Frames received.
    pub messages_received: u64,
    /// Events handed to the publisher.
    pub events_forwarded: u64,
    /// Events dropped on a full queue.
    pub events_dropped: u64,
    /// Reconnect attempts since the last successful session.
    pub reconnect_attempts: u32,
}

/// Log publisher counters.
#[derive(Debug, Clone, Serialize)]
pub struct PublisherInfo {
    /// Events acknowledged by the log.
    pub published: u64,
    /// Events the log refused.
    pub dropped: u64,
}

/// Log consumer counters.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerInfo {
    /// Records decoded into events.
    pub consumed: u64,
    /// Undecodable records skipped.
    pub skipped: u64,
    /// Batches persisted and committed.
    pub batches_flushed: u64,
    /// Failed flush attempts overall.
    pub flush_failures: u64,
    /// Failed flushes since the last success.
    pub failure_streak: u64,
    /// Records waiting for the next flush.
    pub pending: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// What a health server reports on.
#[derive(Clone)]
pub enum HealthSource {
    /// WebSocket to log stage.
    Ingest {
        /// Upstream feed tracker.
        feed: Arc<FeedState>,
        /// Publisher counters.
        publisher: Arc<PublisherStats>,
    },
    /// Log to store stage.
    Stream {
        /// Consumer counters.
        consumer: Arc<ConsumerStats>,
    },
}

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    source: HealthSource,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: impl Into<String>, source: HealthSource) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            source,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");
        serve(listener, self.state, self.cancel).await?;
        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Serve the health routes on an already bound listener.
///
/// # Errors
///
/// Returns `HealthServerError::ServerFailed` if the HTTP server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
) -> Result<(), HealthServerError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HealthServerError::ServerFailed(e.to_string()))
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if is_ready(&build_health_response(&state)) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// =============================================================================
// Status Evaluation
// =============================================================================

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let (service, feed, publisher, consumer) = match &state.source {
        HealthSource::Ingest { feed, publisher } => (
            "market-ingest",
            Some(feed_info(feed)),
            Some(PublisherInfo {
                published: publisher.published(),
                dropped: publisher.dropped(),
            }),
            None,
        ),
        HealthSource::Stream { consumer } => (
            "market-stream",
            None,
            None,
            Some(consumer_info(consumer)),
        ),
    };

    let status = match (&feed, &consumer) {
        (Some(feed), _) => feed_status(feed.state),
        (None, Some(consumer)) => consumer_status(consumer.failure_streak),
        (None, None) => HealthStatus::Unhealthy,
    };

    HealthResponse {
        status,
        service,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        publisher,
        consumer,
    }
}

fn feed_info(state: &FeedState) -> FeedInfo {
    let connection_state = state.state();
    FeedInfo {
        state: connection_state,
        dispatching: connection_state == ConnectionState::Dispatching,
        last_dispatching_at: state.last_dispatching_at(),
        last_error: state.last_error(),
        messages_received: state.messages_received(),
        events_forwarded: state.events_forwarded(),
        events_dropped: state.events_dropped(),
        reconnect_attempts: state.reconnect_attempts(),
    }
}

fn consumer_info(stats: &ConsumerStats) -> ConsumerInfo {
    ConsumerInfo {
        consumed: stats.consumed(),
        skipped: stats.skipped(),
        batches_flushed: stats.batches_flushed(),
        flush_failures: stats.flush_failures(),
        failure_streak: stats.failure_streak(),
        pending: stats.pending(),
    }
}

const fn feed_status(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Dispatching => HealthStatus::Healthy,
        ConnectionState::Connecting
        | ConnectionState::Authenticating
        | ConnectionState::Subscribed
        | ConnectionState::Reconnecting => HealthStatus::Degraded,
        ConnectionState::Disconnected => HealthStatus::Unhealthy,
    }
}

const fn consumer_status(failure_streak: u64) -> HealthStatus {
    match failure_streak {
        0 => HealthStatus::Healthy,
        n if n < UNHEALTHY_FAILURE_STREAK => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

fn is_ready(response: &HealthResponse) -> bool {
    match &response.feed {
        Some(feed) => feed.dispatching,
        None => response.status != HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn ingest_state(feed: &Arc<FeedState>) -> HealthServerState {
        HealthServerState::new(
            "test",
            HealthSource::Ingest {
                feed: Arc::clone(feed),
                publisher: Arc::new(PublisherStats::default()),
            },
        )
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(ConnectionState::Dispatching, HealthStatus::Healthy ; "dispatching")]
    #[test_case(ConnectionState::Reconnecting, HealthStatus::Degraded ; "reconnecting")]
    #[test_case(ConnectionState::Authenticating, HealthStatus::Degraded ; "authenticating")]
    #[test_case(ConnectionState::Disconnected, HealthStatus::Unhealthy ; "disconnected")]
    fn feed_state_maps_to_status(state: ConnectionState, expected: HealthStatus) {
        assert_eq!(feed_status(state), expected);
    }

    #[test_case(0, HealthStatus::Healthy ; "no failures")]
    #[test_case(1, HealthStatus::Degraded ; "retrying")]
    #[test_case(UNHEALTHY_FAILURE_STREAK, HealthStatus::Unhealthy ; "stuck")]
    fn failure_streak_maps_to_status(streak: u64, expected: HealthStatus) {
        assert_eq!(consumer_status(streak), expected);
    }

    #[test]
    fn ingest_ready_only_when_dispatching() {
        let feed = Arc::new(FeedState::new());
        let state = ingest_state(&feed);

        let response = build_health_response(&state);
        assert_eq!(response.service, "market-ingest");
        assert!(!is_ready(&response));
        assert!(response.consumer.is_none());

        feed.set_state(ConnectionState::Dispatching);
        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(is_ready(&response));
        assert!(response.feed.is_some_and(|f| f.last_dispatching_at.is_some()));
    }

    #[test]
    fn stream_response_omits_feed() {
        let state = HealthServerState::new(
            "test",
            HealthSource::Stream {
                consumer: Arc::new(ConsumerStats::default()),
            },
        );

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(is_ready(&response));

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("feed").is_none());
        assert_eq!(json["consumer"]["pending"], 0);
        assert_eq!(json["service"], "market-stream");
    }

    #[tokio::test]
    async fn serves_health_endpoints_over_http() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let feed = Arc::new(FeedState::new());
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            Arc::new(ingest_state(&feed)),
            cancel.clone(),
        ));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /readyz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 503"));
        assert!(body.ends_with("NOT READY"));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
