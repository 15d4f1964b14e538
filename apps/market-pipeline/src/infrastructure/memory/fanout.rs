//! Fan-out that records what it was asked to publish.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{FanoutError, FanoutPublisher};
use crate::domain::market_data::{Bar, MarketEvent, Trade};

/// In-memory [`FanoutPublisher`].
#[derive(Debug, Default)]
pub struct RecordingFanout {
    published: Mutex<Vec<MarketEvent>>,
    failing: AtomicBool,
}

impl RecordingFanout {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Events published so far.
    #[must_use]
    pub fn published(&self) -> Vec<MarketEvent> {
        self.published.lock().clone()
    }

    fn record(&self, event: MarketEvent) -> Result<(), FanoutError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FanoutError::Connection {
                message: "fan-out unavailable".to_string(),
            });
        }
        self.published.lock().push(event);
        Ok(())
    }
}

#[async_trait]
impl FanoutPublisher for RecordingFanout {
    async fn publish_trade(&self, trade: &Trade) -> Result<(), FanoutError> {
        self.record(MarketEvent::Trade(trade.clone()))
    }

    async fn publish_bar(&self, bar: &Bar) -> Result<(), FanoutError> {
        self.record(MarketEvent::Bar(bar.clone()))
    }
}
