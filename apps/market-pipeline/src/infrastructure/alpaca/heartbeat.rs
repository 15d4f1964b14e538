//! Heartbeat Monitor
//!
//! Detects half-open sockets. A ping is requested every `ping_interval`;
//! any inbound frame (data, pong, ping) counts as liveness. If a ping has
//! been outstanding for longer than `pong_timeout` without inbound
//! traffic, the monitor reports a timeout and exits.
//!
//! The monitor is a separate task per connection. The client cancels it
//! through a drop guard so it never outlives the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the connection is dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

/// Requests from the monitor to the connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame.
    SendPing,
    /// Connection is dead.
    Timeout,
}

/// Liveness shared between the monitor and the read loop.
#[derive(Debug)]
pub struct Liveness {
    last_inbound: RwLock<Instant>,
    ping_outstanding: AtomicBool,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Fresh state, as if a frame just arrived.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
            ping_outstanding: AtomicBool::new(false),
        }
    }

    /// Any inbound frame arrived.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
        self.ping_outstanding.store(false, Ordering::SeqCst);
    }

    /// A ping was written.
    pub fn mark_ping_sent(&self) {
        self.ping_outstanding.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is unanswered.
    #[must_use]
    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Per-connection heartbeat task.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    liveness: Arc<Liveness>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        liveness: Arc<Liveness>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            liveness,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver is dropped, or a timeout fires.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    return;
                }
                _ = interval.tick() => {
                    let event = self.evaluate();
                    if self.event_tx.send(event).await.is_err() {
                        tracing::debug!("Heartbeat receiver dropped");
                        return;
                    }
                    if event == HeartbeatEvent::Timeout {
                        return;
                    }
                }
            }
        }
    }

    fn evaluate(&self) -> HeartbeatEvent {
        let silence = self.liveness.silence();
        if self.liveness.ping_outstanding() && silence > self.config.pong_timeout {
            tracing::warn!(
                silence_ms = silence.as_millis(),
                timeout_ms = self.config.pong_timeout.as_millis(),
                "Heartbeat timeout detected"
            );
            HeartbeatEvent::Timeout
        } else {
            HeartbeatEvent::SendPing
        }
    }
}
