//! Fan-out Port (Driven Port)
//!
//! Best-effort republish of persisted events for live consumers. Offline
//! consumers miss events; callers only log failures.

use async_trait::async_trait;

use crate::domain::market_data::{Bar, Trade};

/// Fan-out errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FanoutError {
    /// Connection error.
    #[error("fan-out connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Serialization error.
    #[error("fan-out serialization error: {message}")]
    Serialization {
        /// Error details.
        message: String,
    },

    /// Publishing failed.
    #[error("fan-out publish failed: {message}")]
    PublishFailed {
        /// Error details.
        message: String,
    },
}

/// Port for republishing events to a pub/sub structure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FanoutPublisher: Send + Sync {
    /// Republish a persisted trade.
    async fn publish_trade(&self, trade: &Trade) -> Result<(), FanoutError>;

    /// Republish a persisted bar.
    async fn publish_bar(&self, bar: &Bar) -> Result<(), FanoutError>;
}

/// Fan-out that discards everything. Used when Redis is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFanout;

#[async_trait]
impl FanoutPublisher for NoOpFanout {
    async fn publish_trade(&self, _trade: &Trade) -> Result<(), FanoutError> {
        Ok(())
    }

    async fn publish_bar(&self, _bar: &Bar) -> Result<(), FanoutError> {
        Ok(())
    }
}
