//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Feed**: frames received, events forwarded and dropped, reconnects
//! - **Log**: events published to and consumed from the event log
//! - **Sink**: batch flushes, flush failures, fan-out failures
//! - **Jobs**: batch job runs
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::market_data::EventKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the first handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "market_pipeline_frames_received_total",
        "WebSocket text frames received from the feed"
    );
    describe_counter!(
        "market_pipeline_events_received_total",
        "Canonical events handed to the publisher"
    );
    describe_counter!(
        "market_pipeline_events_dropped_total",
        "Events dropped before reaching the event log"
    );
    describe_counter!(
        "market_pipeline_reconnects_total",
        "Feed reconnection attempts"
    );
    describe_gauge!(
        "market_pipeline_feed_dispatching",
        "1 while the feed session is dispatching"
    );

    // Event log
    describe_counter!(
        "market_pipeline_events_published_total",
        "Events acknowledged by the event log"
    );
    describe_counter!(
        "market_pipeline_records_consumed_total",
        "Records decoded from the event log"
    );
    describe_counter!(
        "market_pipeline_poison_records_total",
        "Records that could not be decoded and were skipped"
    );

    // Sink
    describe_gauge!(
        "market_pipeline_pending_batch_size",
        "Records held in the pending batch"
    );
    describe_counter!(
        "market_pipeline_rows_written_total",
        "Rows written to the relational store"
    );
    describe_histogram!(
        "market_pipeline_batch_flush_seconds",
        "Time to write and commit one batch"
    );
    describe_counter!(
        "market_pipeline_flush_failures_total",
        "Batch flush failures by stage"
    );
    describe_counter!(
        "market_pipeline_fanout_failures_total",
        "Fan-out publish failures"
    );

    // Jobs
    describe_counter!("market_pipeline_job_runs_total", "Batch job runs by outcome");
    describe_histogram!(
        "market_pipeline_job_duration_seconds",
        "Batch job run duration"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Why an event never reached the event log.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Publisher queue was full.
    QueueFull,
    /// Feed message failed domain validation.
    InvalidEvent,
    /// Feed message could not be decoded.
    Malformed,
    /// Event log rejected the publish.
    PublishFailed,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::InvalidEvent => "invalid_event",
            Self::Malformed => "malformed",
            Self::PublishFailed => "publish_failed",
        }
    }
}

/// Step of a batch flush.
#[derive(Debug, Clone, Copy)]
pub enum FlushStage {
    /// Writing trades.
    Trades,
    /// Writing bars.
    Bars,
    /// Committing log positions.
    Commit,
}

impl FlushStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Bars => "bars",
            Self::Commit => "commit",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one inbound text frame.
pub fn record_frame_received() {
    counter!("market_pipeline_frames_received_total").increment(1);
}

/// Record an event handed to the publisher.
pub fn record_event_received(kind: EventKind) {
    counter!("market_pipeline_events_received_total", "kind" => kind.as_str()).increment(1);
}

/// Record a dropped event.
pub fn record_event_dropped(reason: DropReason) {
    counter!("market_pipeline_events_dropped_total", "reason" => reason.as_str()).increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_reconnect() {
    counter!("market_pipeline_reconnects_total").increment(1);
}

/// Flag whether the feed is dispatching.
pub fn set_feed_dispatching(dispatching: bool) {
    gauge!("market_pipeline_feed_dispatching").set(if dispatching { 1.0 } else { 0.0 });
}

/// Record an event acknowledged by the event log.
pub fn record_event_published(kind: EventKind) {
    counter!("market_pipeline_events_published_total", "kind" => kind.as_str()).increment(1);
}

/// Record a decoded record.
pub fn record_record_consumed(kind: EventKind) {
    counter!("market_pipeline_records_consumed_total", "kind" => kind.as_str()).increment(1);
}

/// Record a record that could not be decoded.
pub fn record_poison_record(topic: &str) {
    counter!("market_pipeline_poison_records_total", "topic" => topic.to_string()).increment(1);
}

/// Update the pending batch gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_batch_size(records: usize) {
    gauge!("market_pipeline_pending_batch_size").set(records as f64);
}

/// Record a successful flush.
pub fn record_batch_flushed(trades: u64, bars: u64, duration: Duration) {
    counter!("market_pipeline_rows_written_total", "kind" => EventKind::Trade.as_str())
        .increment(trades);
    counter!("market_pipeline_rows_written_total", "kind" => EventKind::Bar.as_str())
        .increment(bars);
    histogram!("market_pipeline_batch_flush_seconds").record(duration.as_secs_f64());
}

/// Record a failed flush step.
pub fn record_flush_failure(stage: FlushStage) {
    counter!("market_pipeline_flush_failures_total", "stage" => stage.as_str()).increment(1);
}

/// Record a fan-out failure.
pub fn record_fanout_failure(kind: EventKind) {
    counter!("market_pipeline_fanout_failures_total", "kind" => kind.as_str()).increment(1);
}

/// Record a batch job run.
pub fn record_job_run(job: &str, success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "market_pipeline_job_runs_total",
        "job" => job.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("market_pipeline_job_duration_seconds", "job" => job.to_string())
        .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
