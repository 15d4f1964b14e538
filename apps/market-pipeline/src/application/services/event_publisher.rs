//! Event Publisher Service
//!
//! Drains the feed queue and appends each event to its topic, keyed by
//! symbol. Events are sent one at a time so the log sees them in arrival
//! order. A failed publish is logged, counted and skipped; the feed never
//! waits on the log.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EventLogProducer, LogError, Topics};
use crate::domain::market_data::MarketEvent;
use crate::infrastructure::metrics::{self, DropReason};

/// Default bound on the shutdown flush.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Publish counters.
#[derive(Debug, Default)]
pub struct PublisherStats {
    published: AtomicU64,
    dropped: AtomicU64,
}

impl PublisherStats {
    /// Events acknowledged by the log.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events that failed to publish.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Appends feed events to the durable log.
pub struct EventPublisher {
    producer: Arc<dyn EventLogProducer>,
    topics: Topics,
    stats: Arc<PublisherStats>,
    flush_timeout: Duration,
}

impl EventPublisher {
    /// Create a publisher.
    #[must_use]
    pub fn new(producer: Arc<dyn EventLogProducer>, topics: Topics) -> Self {
        Self {
            producer,
            topics,
            stats: Arc::new(PublisherStats::default()),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Override the shutdown flush bound.
    #[must_use]
    pub const fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }

    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized or the log does
    /// not acknowledge it.
    pub async fn publish(&self, event: &MarketEvent) -> Result<(), LogError> {
        let topic = self.topics.for_kind(event.kind());
        let payload = event.to_json().map_err(|e| LogError::PublishFailed {
            topic: topic.to_string(),
            message: format!("serialization failed: {e}"),
        })?;

        self.producer
            .send(topic, event.symbol().as_str(), &payload)
            .await
    }

    /// Consume the feed queue until cancelled or the sender is dropped.
    ///
    /// On shutdown, events already queued are still published and the
    /// producer is flushed.
    pub async fn run(self, mut events: mpsc::Receiver<MarketEvent>, cancel: CancellationToken) {
        tracing::info!(
            trades_topic = %self.topics.trades,
            bars_topic = %self.topics.bars,
            "Event publisher started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.publish_or_drop(&event).await,
                    None => {
                        tracing::info!("Feed queue closed");
                        break;
                    }
                },
            }
        }

        events.close();
        let mut drained = 0_u64;
        while let Ok(event) = events.try_recv() {
            self.publish_or_drop(&event).await;
            drained += 1;
        }

        match self.producer.flush(self.flush_timeout).await {
            Ok(()) => tracing::info!(
                drained,
                published = self.stats.published(),
                dropped = self.stats.dropped(),
                "Event publisher stopped"
            ),
            Err(e) => tracing::warn!(error = %e, "Producer flush failed on shutdown"),
        }
    }

    async fn publish_or_drop(&self, event: &MarketEvent) {
        let kind = event.kind();
        match self.publish(event).await {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_published(kind);
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_dropped(DropReason::PublishFailed);
                tracing::warn!(
                    error = %e,
                    symbol = %event.symbol(),
                    kind = kind.as_str(),
                    "Dropping event after publish failure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::MockEventLogProducer;
    use crate::domain::market_data::{Bar, EpochNanos, Symbol, Timeframe, Trade};

    fn trade(symbol: &str, ts: i64) -> MarketEvent {
        MarketEvent::Trade(Trade {
            symbol: Symbol::new(symbol).unwrap(),
            price: dec!(10.5),
            size: dec!(3),
            timestamp: EpochNanos::new(ts).unwrap(),
            exchange: String::new(),
            conditions: Vec::new(),
        })
    }

    fn bar(symbol: &str) -> MarketEvent {
        MarketEvent::Bar(Bar {
            symbol: Symbol::new(symbol).unwrap(),
            timeframe: Timeframe::Minute,
            open: dec!(1),
            high: dec!(2),
            low: dec!(1),
            close: dec!(2),
            volume: 10,
            trade_count: 1,
            vwap: None,
            timestamp: EpochNanos::new(60_000_000_000).unwrap(),
        })
    }

    type SendLog = Arc<Mutex<Vec<(String, String, Vec<u8>)>>>;

    fn recording_producer(fail_first: bool) -> (MockEventLogProducer, SendLog) {
        let sent: SendLog = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&sent);
        let mut calls = 0_u32;

        let mut producer = MockEventLogProducer::new();
        producer.expect_send().returning(move |topic, key, payload| {
            calls += 1;
            if fail_first && calls == 1 {
                return Err(LogError::PublishFailed {
                    topic: topic.to_string(),
                    message: "broker down".to_string(),
                });
            }
            log.lock()
                .push((topic.to_string(), key.to_string(), payload.to_vec()));
            Ok(())
        });
        producer.expect_flush().times(1).returning(|_| Ok(()));
        (producer, sent)
    }

    #[tokio::test]
    async fn routes_by_kind_and_keys_by_symbol_in_order() {
        let (producer, sent) = recording_producer(false);
        let publisher = EventPublisher::new(Arc::new(producer), Topics::default());
        let stats = publisher.stats();

        let (tx, rx) = mpsc::channel(8);
        tx.send(trade("AAPL", 1)).await.unwrap();
        tx.send(bar("MSFT")).await.unwrap();
        tx.send(trade("AAPL", 2)).await.unwrap();
        drop(tx);

        publisher.run(rx, CancellationToken::new()).await;

        let sent = sent.lock();
        let routes: Vec<_> = sent.iter().map(|(t, k, _)| (t.as_str(), k.as_str())).collect();
        assert_eq!(
            routes,
            vec![
                ("stock_trades_realtime", "AAPL"),
                ("stock_bars_staging", "MSFT"),
                ("stock_trades_realtime", "AAPL"),
            ]
        );
        let first: serde_json::Value = serde_json::from_slice(&sent[0].2).unwrap();
        let second: serde_json::Value = serde_json::from_slice(&sent[2].2).unwrap();
        assert_eq!(first["timestamp"], 1);
        assert_eq!(second["timestamp"], 2);
        assert_eq!(stats.published(), 3);
        assert_eq!(stats.dropped(), 0);
    }

    #[tokio::test]
    async fn publish_failure_is_counted_and_skipped() {
        let (producer, sent) = recording_producer(true);
        let publisher = EventPublisher::new(Arc::new(producer), Topics::default());
        let stats = publisher.stats();

        let (tx, rx) = mpsc::channel(8);
        tx.send(trade("AAPL", 1)).await.unwrap();
        tx.send(trade("AAPL", 2)).await.unwrap();
        drop(tx);

        publisher.run(rx, CancellationToken::new()).await;

        assert_eq!(stats.dropped(), 1);
        assert_eq!(stats.published(), 1);
        assert_eq!(sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_queue_then_flushes() {
        let (producer, sent) = recording_producer(false);
        let publisher = EventPublisher::new(Arc::new(producer), Topics::default());

        let (tx, rx) = mpsc::channel(8);
        tx.send(trade("AAPL", 1)).await.unwrap();
        tx.send(trade("MSFT", 2)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        publisher.run(rx, cancel).await;

        assert_eq!(sent.lock().len(), 2);
        drop(tx);
    }
}
