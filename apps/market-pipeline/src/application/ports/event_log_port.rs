//! Durable Log Ports (Driven Ports)
//!
//! Interfaces for the partitioned, ordered log between the ingest side
//! and the stream side. Records are keyed by symbol so every event for a
//! symbol lands on one partition and is read back in send order.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::batch::LogPosition;
use crate::domain::market_data::EventKind;

/// Default topic for trade events.
pub const DEFAULT_TRADES_TOPIC: &str = "stock_trades_realtime";

/// Default topic for bar events.
pub const DEFAULT_BARS_TOPIC: &str = "stock_bars_staging";

/// Durable log errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogError {
    /// Broker unreachable or client misconfigured.
    #[error("log connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Record was not acknowledged.
    #[error("publish to {topic} failed: {message}")]
    PublishFailed {
        /// Destination topic.
        topic: String,
        /// Error details.
        message: String,
    },

    /// Reading from the log failed.
    #[error("log receive failed: {message}")]
    ReceiveFailed {
        /// Error details.
        message: String,
    },

    /// Offset commit failed.
    #[error("offset commit failed: {message}")]
    CommitFailed {
        /// Error details.
        message: String,
    },

    /// Pausing or resuming fetches failed.
    #[error("flow control failed: {message}")]
    FlowControl {
        /// Error details.
        message: String,
    },
}

/// Topic names, one per event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Trade topic.
    pub trades: String,
    /// Bar topic.
    pub bars: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            trades: DEFAULT_TRADES_TOPIC.to_string(),
            bars: DEFAULT_BARS_TOPIC.to_string(),
        }
    }
}

impl Topics {
    /// Topic carrying events of `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Trade => &self.trades,
            EventKind::Bar => &self.bars,
        }
    }

    /// Event kind carried by `topic`, if it is one of ours.
    #[must_use]
    pub fn kind_of(&self, topic: &str) -> Option<EventKind> {
        if topic == self.trades {
            Some(EventKind::Trade)
        } else if topic == self.bars {
            Some(EventKind::Bar)
        } else {
            None
        }
    }

    /// Both topic names, trades first.
    #[must_use]
    pub fn all(&self) -> [&str; 2] {
        [&self.trades, &self.bars]
    }
}

/// A record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Where the record was read from.
    pub position: LogPosition,
    /// Record key (symbol), if any.
    pub key: Option<String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Port for appending records to the log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventLogProducer: Send + Sync {
    /// Append one record. Resolves once the broker acknowledges it.
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), LogError>;

    /// Wait for outstanding records to be delivered.
    async fn flush(&self, timeout: Duration) -> Result<(), LogError>;
}

/// Port for reading the log as a consumer-group member.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventLogConsumer: Send + Sync {
    /// Wait up to `timeout` for the next record.
    async fn poll(&self, timeout: Duration) -> Result<Option<LogRecord>, LogError>;

    /// Commit positions. Each position is the next offset to read.
    async fn commit(&self, positions: &[LogPosition]) -> Result<(), LogError>;

    /// Stop fetching from the current assignment. `poll` must still be
    /// called while paused so the member stays in its group.
    fn pause(&self) -> Result<(), LogError>;

    /// Resume fetching from the current assignment.
    fn resume(&self) -> Result<(), LogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics() {
        let topics = Topics::default();
        assert_eq!(topics.for_kind(EventKind::Trade), "stock_trades_realtime");
        assert_eq!(topics.for_kind(EventKind::Bar), "stock_bars_staging");
    }

    #[test]
    fn kind_of_round_trips() {
        let topics = Topics {
            trades: "t".to_string(),
            bars: "b".to_string(),
        };
        assert_eq!(topics.kind_of("t"), Some(EventKind::Trade));
        assert_eq!(topics.kind_of("b"), Some(EventKind::Bar));
        assert_eq!(topics.kind_of("quotes"), None);
    }
}
