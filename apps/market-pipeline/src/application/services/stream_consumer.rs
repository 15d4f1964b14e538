//! Stream Consumer Service
//!
//! Reads the durable log as a consumer-group member, buffers decoded
//! events, and flushes them to the relational store. Offsets are
//! committed only after the store acknowledges the whole batch, so a
//! crash between write and commit redelivers instead of losing data.
//!
//! # Flush order
//!
//! 1. Trades not yet written are appended in one transaction.
//! 2. Bars are upserted in one transaction.
//! 3. Persisted events are fanned out (failures logged only).
//! 4. Log positions are committed.
//!
//! A failed flush keeps the batch and retries it with exponential
//! backoff. Fetching is paused meanwhile but polling continues, so the
//! member keeps its place in the group. Once the writes succeed only the
//! commit is retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    EventLogConsumer, FanoutPublisher, LogError, LogRecord, MarketDataStore, PersistenceError,
    Topics,
};
use crate::domain::backoff::{BackoffConfig, BackoffPolicy};
use crate::domain::batch::PendingBatch;
use crate::domain::market_data::{EventKind, MarketEvent, latest_bars};
use crate::infrastructure::metrics::{self, FlushStage};

/// Pause after a failed poll.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Flush once this many records are buffered.
    pub batch_size: usize,
    /// Flush a non-empty batch at least this often.
    pub flush_interval: Duration,
    /// Upper bound on one poll.
    pub poll_timeout: Duration,
    /// Backoff between failed flush attempts.
    pub retry: BackoffConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(250),
            retry: BackoffConfig::default(),
        }
    }
}

/// Why a flush did not complete.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    /// Trade or bar write failed.
    #[error("{stage} write failed: {source}")]
    Store {
        /// Which write failed.
        stage: &'static str,
        /// Store error.
        #[source]
        source: PersistenceError,
    },

    /// Offsets were not committed.
    #[error("commit failed: {0}")]
    Commit(#[source] LogError),
}

/// Consumer counters.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    consumed: AtomicU64,
    skipped: AtomicU64,
    batches_flushed: AtomicU64,
    flush_failures: AtomicU64,
    failure_streak: AtomicU64,
    pending: AtomicU64,
}

impl ConsumerStats {
    /// Records decoded into events.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// Records skipped as undecodable.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Batches persisted and committed.
    #[must_use]
    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed.load(Ordering::Relaxed)
    }

    /// Failed flush attempts.
    #[must_use]
    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// Failed flushes since the last successful one.
    #[must_use]
    pub fn failure_streak(&self) -> u64 {
        self.failure_streak.load(Ordering::Relaxed)
    }

    /// Records currently buffered.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }
}

/// Log-to-store pipeline stage.
pub struct StreamConsumer {
    consumer: Arc<dyn EventLogConsumer>,
    store: Arc<dyn MarketDataStore>,
    fanout: Arc<dyn FanoutPublisher>,
    topics: Topics,
    config: ConsumerConfig,
    stats: Arc<ConsumerStats>,
}

impl StreamConsumer {
    /// Create a consumer service.
    #[must_use]
    pub fn new(
        consumer: Arc<dyn EventLogConsumer>,
        store: Arc<dyn MarketDataStore>,
        fanout: Arc<dyn FanoutPublisher>,
        topics: Topics,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            consumer,
            store,
            fanout,
            topics,
            config,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until cancelled, then attempt one final flush.
    ///
    /// Offsets of the final batch are committed only if that flush
    /// succeeds; otherwise they are redelivered after restart.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis(),
            "Stream consumer started"
        );

        let mut batch = PendingBatch::new();
        let mut retry = BackoffPolicy::new(self.config.retry.clone());
        let mut retry_at: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if self.flush_due(&batch, retry_at) {
                match self.flush(&mut batch).await {
                    Ok(()) => {
                        if retry_at.take().is_some() {
                            self.set_paused(false);
                        }
                        retry.reset();
                    }
                    Err(e) => {
                        let delay = retry
                            .next_delay()
                            .unwrap_or(self.config.retry.max_delay);
                        tracing::warn!(
                            error = %e,
                            records = batch.len(),
                            awaiting_commit = batch.awaiting_commit(),
                            attempt = retry.attempt_count(),
                            delay_ms = delay.as_millis(),
                            "Flush failed, holding batch"
                        );
                        self.set_paused(true);
                        retry_at = Some(Instant::now() + delay);
                    }
                }
            }

            // Polling continues while paused so the group session stays alive.
            let timeout = self.poll_timeout(&batch, retry_at);
            tokio::select! {
                () = cancel.cancelled() => break,
                polled = self.consumer.poll(timeout) => match polled {
                    Ok(Some(record)) => self.accept(&mut batch, record),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Log poll failed");
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(POLL_ERROR_PAUSE) => {}
                        }
                    }
                },
            }
        }

        if batch.is_empty() {
            tracing::info!("Stream consumer stopped");
            return;
        }

        match self.flush(&mut batch).await {
            Ok(()) => tracing::info!("Final batch flushed, stream consumer stopped"),
            Err(e) => tracing::warn!(
                error = %e,
                records = batch.len(),
                awaiting_commit = batch.awaiting_commit(),
                "Final flush failed, offsets left uncommitted for redelivery"
            ),
        }
    }

    fn set_paused(&self, paused: bool) {
        let result = if paused {
            self.consumer.pause()
        } else {
            self.consumer.resume()
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, paused, "Fetch flow control failed");
        }
    }

    /// A held batch is retried on its backoff schedule only.
    fn flush_due(&self, batch: &PendingBatch, retry_at: Option<Instant>) -> bool {
        if let Some(at) = retry_at {
            return Instant::now() >= at;
        }
        batch.is_full(self.config.batch_size)
            || batch
                .age()
                .is_some_and(|age| age >= self.config.flush_interval)
    }

    /// Poll no longer than the time left before the batch is due.
    fn poll_timeout(&self, batch: &PendingBatch, retry_at: Option<Instant>) -> Duration {
        if let Some(at) = retry_at {
            return at
                .saturating_duration_since(Instant::now())
                .min(self.config.poll_timeout);
        }
        batch.age().map_or(self.config.poll_timeout, |age| {
            self.config
                .flush_interval
                .saturating_sub(age)
                .min(self.config.poll_timeout)
        })
    }

    /// Decode a record into the batch. Undecodable records are tracked so
    /// their offsets still advance.
    fn accept(&self, batch: &mut PendingBatch, record: LogRecord) {
        match self.decode(&record) {
            Some(event) => {
                metrics::record_record_consumed(event.kind());
                self.stats.consumed.fetch_add(1, Ordering::Relaxed);
                batch.push(&record.position, event);
            }
            None => {
                metrics::record_poison_record(&record.position.topic);
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                batch.skip(&record.position);
            }
        }

        let pending = batch.len();
        self.stats.pending.store(pending as u64, Ordering::Relaxed);
        metrics::set_pending_batch_size(pending);
    }

    fn decode(&self, record: &LogRecord) -> Option<MarketEvent> {
        let position = &record.position;
        let Some(kind) = self.topics.kind_of(&position.topic) else {
            tracing::warn!(topic = %position.topic, "Record from unexpected topic");
            return None;
        };

        match MarketEvent::from_json(kind, &record.payload) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    topic = %position.topic,
                    partition = position.partition,
                    offset = position.offset,
                    "Skipping undecodable record"
                );
                None
            }
        }
    }

    /// Persist, fan out, then commit. The batch is cleared only on success.
    async fn flush(&self, batch: &mut PendingBatch) -> Result<(), FlushError> {
        let result = self.write_and_commit(batch).await;
        if let Err(e) = &result {
            self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
            self.stats.failure_streak.fetch_add(1, Ordering::Relaxed);
            metrics::record_flush_failure(match e {
                FlushError::Store { stage: "trades", .. } => FlushStage::Trades,
                FlushError::Store { .. } => FlushStage::Bars,
                FlushError::Commit(_) => FlushStage::Commit,
            });
            return result;
        }

        batch.clear();
        self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.stats.failure_streak.store(0, Ordering::Relaxed);
        self.stats.pending.store(0, Ordering::Relaxed);
        metrics::set_pending_batch_size(0);
        Ok(())
    }

    /// Written events are dropped from the batch before the commit, so a
    /// failed commit is retried without writing them again.
    async fn write_and_commit(&self, batch: &mut PendingBatch) -> Result<(), FlushError> {
        if !batch.awaiting_commit() {
            self.write(batch).await?;
            batch.mark_written();
            self.stats.pending.store(0, Ordering::Relaxed);
            metrics::set_pending_batch_size(0);
        }

        self.consumer
            .commit(&batch.commit_positions())
            .await
            .map_err(FlushError::Commit)
    }

    async fn write(&self, batch: &mut PendingBatch) -> Result<(), FlushError> {
        let started = Instant::now();

        let trades = if batch.unwritten_trades().is_empty() {
            0
        } else {
            self.store
                .write_trades(batch.unwritten_trades())
                .await
                .map_err(|source| FlushError::Store {
                    stage: "trades",
                    source,
                })?
        };
        batch.mark_trades_written();

        let bars = latest_bars(batch.bars());
        let bar_rows = if bars.is_empty() {
            0
        } else {
            self.store
                .write_bars(&bars)
                .await
                .map_err(|source| FlushError::Store {
                    stage: "bars",
                    source,
                })?
        };

        for trade in batch.trades() {
            if let Err(e) = self.fanout.publish_trade(trade).await {
                tracing::debug!(error = %e, symbol = %trade.symbol, "Trade fan-out failed");
                metrics::record_fanout_failure(EventKind::Trade);
            }
        }
        for bar in &bars {
            if let Err(e) = self.fanout.publish_bar(bar).await {
                tracing::debug!(error = %e, symbol = %bar.symbol, "Bar fan-out failed");
                metrics::record_fanout_failure(EventKind::Bar);
            }
        }

        tracing::debug!(
            records = batch.len(),
            trades = batch.trades().len(),
            bars = batch.bars().len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Batch written"
        );
        metrics::record_batch_flushed(trades, bar_rows, started.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{
        EventLogProducer, MockFanoutPublisher, MockMarketDataStore,
    };
    use crate::domain::batch::LogPosition;
    use crate::domain::market_data::{Bar, EpochNanos, Symbol, Timeframe, Trade};
    use crate::infrastructure::memory::InMemoryEventLog;

    const TRADES: &str = "stock_trades_realtime";
    const BARS: &str = "stock_bars_staging";

    fn trade(symbol: &str, ts: i64) -> MarketEvent {
        MarketEvent::Trade(Trade {
            symbol: Symbol::new(symbol).unwrap(),
            price: dec!(10),
            size: dec!(1),
            timestamp: EpochNanos::new(ts).unwrap(),
            exchange: String::new(),
            conditions: Vec::new(),
        })
    }

    fn bar(symbol: &str, ts: i64) -> MarketEvent {
        MarketEvent::Bar(Bar {
            symbol: Symbol::new(symbol).unwrap(),
            timeframe: Timeframe::Minute,
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: 1,
            trade_count: 1,
            vwap: None,
            timestamp: EpochNanos::new(ts).unwrap(),
        })
    }

    async fn append(log: &InMemoryEventLog, event: &MarketEvent) {
        let topic = match event {
            MarketEvent::Trade(_) => TRADES,
            MarketEvent::Bar(_) => BARS,
        };
        log.send(topic, event.symbol().as_str(), &event.to_json().unwrap())
            .await
            .unwrap();
    }

    fn fast_config(batch_size: usize) -> ConsumerConfig {
        ConsumerConfig {
            batch_size,
            flush_interval: Duration::from_secs(3600),
            poll_timeout: Duration::from_millis(10),
            retry: BackoffConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                ..BackoffConfig::default()
            },
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    /// In-memory log whose first `failures` commits are rejected.
    struct RejectingCommits {
        log: Arc<InMemoryEventLog>,
        failures: AtomicU32,
        commits: AtomicU32,
    }

    impl RejectingCommits {
        fn new(log: Arc<InMemoryEventLog>, failures: u32) -> Self {
            Self {
                log,
                failures: AtomicU32::new(failures),
                commits: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EventLogConsumer for RejectingCommits {
        async fn poll(&self, timeout: Duration) -> Result<Option<LogRecord>, LogError> {
            self.log.poll(timeout).await
        }

        async fn commit(&self, positions: &[LogPosition]) -> Result<(), LogError> {
            self.commits.fetch_add(1, Ordering::Relaxed);
            let rejected = self
                .failures
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(LogError::CommitFailed {
                    message: "unknown member".to_string(),
                });
            }
            self.log.commit(positions).await
        }

        fn pause(&self) -> Result<(), LogError> {
            self.log.pause()
        }

        fn resume(&self) -> Result<(), LogError> {
            self.log.resume()
        }
    }

    fn quiet_fanout() -> MockFanoutPublisher {
        let mut fanout = MockFanoutPublisher::new();
        fanout.expect_publish_trade().returning(|_| Ok(()));
        fanout.expect_publish_bar().returning(|_| Ok(()));
        fanout
    }

    #[tokio::test]
    async fn writes_trades_then_bars_then_fans_out_then_commits() {
        let log = Arc::new(InMemoryEventLog::new(1));
        append(&log, &trade("AAPL", 1)).await;
        append(&log, &bar("AAPL", 60)).await;
        append(&log, &trade("AAPL", 2)).await;

        let order = Arc::new(Mutex::new(Vec::<String>::new()));

        let mut store = MockMarketDataStore::new();
        let o = Arc::clone(&order);
        store.expect_write_trades().times(1).returning(move |trades| {
            o.lock().push(format!("trades:{}", trades.len()));
            Ok(trades.len() as u64)
        });
        let o = Arc::clone(&order);
        store.expect_write_bars().times(1).returning(move |bars| {
            o.lock().push(format!("bars:{}", bars.len()));
            Ok(bars.len() as u64)
        });

        let mut fanout = MockFanoutPublisher::new();
        let o = Arc::clone(&order);
        fanout.expect_publish_trade().times(2).returning(move |_| {
            o.lock().push("fanout:trade".to_string());
            Ok(())
        });
        let o = Arc::clone(&order);
        fanout.expect_publish_bar().times(1).returning(move |_| {
            o.lock().push("fanout:bar".to_string());
            Ok(())
        });

        let service = StreamConsumer::new(
            log.clone(),
            Arc::new(store),
            Arc::new(fanout),
            Topics::default(),
            fast_config(3),
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.batches_flushed() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(
            *order.lock(),
            vec!["trades:2", "bars:1", "fanout:trade", "fanout:trade", "fanout:bar"]
        );
        assert_eq!(log.committed(TRADES, 0), Some(2));
        assert_eq!(log.committed(BARS, 0), Some(1));
    }

    #[tokio::test]
    async fn store_failure_holds_batch_until_recovery() {
        let log = Arc::new(InMemoryEventLog::new(1));
        append(&log, &trade("AAPL", 1)).await;
        append(&log, &trade("AAPL", 2)).await;

        let attempts = Arc::new(Mutex::new(0_u32));
        let a = Arc::clone(&attempts);
        let mut store = MockMarketDataStore::new();
        store.expect_write_trades().returning(move |trades| {
            let mut attempts = a.lock();
            *attempts += 1;
            if *attempts < 3 {
                Err(PersistenceError::Connection("database down".to_string()))
            } else {
                Ok(trades.len() as u64)
            }
        });

        let service = StreamConsumer::new(
            log.clone(),
            Arc::new(store),
            Arc::new(quiet_fanout()),
            Topics::default(),
            fast_config(2),
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.flush_failures() >= 1).await;
        assert_eq!(log.committed(TRADES, 0), None);

        wait_until(|| stats.batches_flushed() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(*attempts.lock(), 3);
        assert_eq!(stats.flush_failures(), 2);
        assert_eq!(stats.failure_streak(), 0);
        assert_eq!(log.committed(TRADES, 0), Some(2));
    }

    #[tokio::test]
    async fn poison_record_is_skipped_and_committed() {
        let log = Arc::new(InMemoryEventLog::new(1));
        log.send(TRADES, "AAPL", b"not json").await.unwrap();
        append(&log, &trade("AAPL", 1)).await;

        let mut store = MockMarketDataStore::new();
        store
            .expect_write_trades()
            .times(1)
            .returning(|trades| Ok(trades.len() as u64));

        let service = StreamConsumer::new(
            log.clone(),
            Arc::new(store),
            Arc::new(quiet_fanout()),
            Topics::default(),
            fast_config(2),
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.batches_flushed() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.consumed(), 1);
        assert_eq!(log.committed(TRADES, 0), Some(2));
    }

    #[tokio::test]
    async fn flush_interval_flushes_partial_batch() {
        let log = Arc::new(InMemoryEventLog::new(1));
        append(&log, &bar("MSFT", 60)).await;

        let mut store = MockMarketDataStore::new();
        store
            .expect_write_bars()
            .times(1)
            .returning(|bars| Ok(bars.len() as u64));

        let mut config = fast_config(100);
        config.flush_interval = Duration::from_millis(30);

        let service = StreamConsumer::new(
            log.clone(),
            Arc::new(store),
            Arc::new(quiet_fanout()),
            Topics::default(),
            config,
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.batches_flushed() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(log.committed(BARS, 0), Some(1));
    }

    #[tokio::test]
    async fn failed_final_flush_leaves_offsets_uncommitted() {
        let log = Arc::new(InMemoryEventLog::new(1));
        append(&log, &trade("AAPL", 1)).await;

        let mut store = MockMarketDataStore::new();
        store
            .expect_write_trades()
            .returning(|_| Err(PersistenceError::Connection("down".to_string())));

        let service = StreamConsumer::new(
            log.clone(),
            Arc::new(store),
            Arc::new(quiet_fanout()),
            Topics::default(),
            fast_config(100),
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.pending() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(stats.flush_failures(), 1);
        assert_eq!(log.committed(TRADES, 0), None);
    }

    #[tokio::test]
    async fn fanout_failure_does_not_block_commit() {
        let log = Arc::new(InMemoryEventLog::new(1));
        append(&log, &trade("AAPL", 1)).await;

        let mut store = MockMarketDataStore::new();
        store
            .expect_write_trades()
            .returning(|trades| Ok(trades.len() as u64));

        let mut fanout = MockFanoutPublisher::new();
        fanout.expect_publish_trade().returning(|_| {
            Err(crate::application::ports::FanoutError::Connection {
                message: "redis down".to_string(),
            })
        });

        let service = StreamConsumer::new(
            log.clone(),
            Arc::new(store),
            Arc::new(fanout),
            Topics::default(),
            fast_config(1),
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.batches_flushed() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(log.committed(TRADES, 0), Some(1));
    }

    #[tokio::test]
    async fn commit_failure_retries_commit_without_rewriting() {
        let log = Arc::new(InMemoryEventLog::new(1));
        append(&log, &trade("AAPL", 1)).await;

        let mut store = MockMarketDataStore::new();
        store
            .expect_write_trades()
            .times(1)
            .returning(|trades| Ok(trades.len() as u64));
        let mut fanout = MockFanoutPublisher::new();
        fanout.expect_publish_trade().times(1).returning(|_| Ok(()));

        let consumer = Arc::new(RejectingCommits::new(Arc::clone(&log), 4));
        let service = StreamConsumer::new(
            consumer.clone(),
            Arc::new(store),
            Arc::new(fanout),
            Topics::default(),
            fast_config(1),
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.flush_failures() >= 1).await;
        let polls_at_first_failure = log.polls();
        assert!(log.is_paused());

        wait_until(|| stats.batches_flushed() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(consumer.commits.load(Ordering::Relaxed), 5);
        assert_eq!(stats.flush_failures(), 4);
        assert!(log.polls() > polls_at_first_failure);
        assert!(!log.is_paused());
        assert_eq!(log.committed(TRADES, 0), Some(1));
    }

    #[tokio::test]
    async fn bar_failure_does_not_rewrite_trades() {
        let log = Arc::new(InMemoryEventLog::new(1));
        append(&log, &trade("AAPL", 1)).await;
        append(&log, &bar("AAPL", 60)).await;

        let bar_attempts = Arc::new(AtomicU32::new(0));
        let attempts = Arc::clone(&bar_attempts);
        let mut store = MockMarketDataStore::new();
        store
            .expect_write_trades()
            .times(1)
            .returning(|trades| Ok(trades.len() as u64));
        store.expect_write_bars().times(2).returning(move |bars| {
            if attempts.fetch_add(1, Ordering::Relaxed) == 0 {
                Err(PersistenceError::Connection("database down".to_string()))
            } else {
                Ok(bars.len() as u64)
            }
        });

        let service = StreamConsumer::new(
            log.clone(),
            Arc::new(store),
            Arc::new(quiet_fanout()),
            Topics::default(),
            fast_config(2),
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.batches_flushed() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(stats.flush_failures(), 1);
        assert_eq!(log.committed(TRADES, 0), Some(1));
        assert_eq!(log.committed(BARS, 0), Some(1));
    }

    #[tokio::test]
    async fn held_batch_pauses_fetch_until_written() {
        let log = Arc::new(InMemoryEventLog::new(1));
        append(&log, &trade("AAPL", 1)).await;

        let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ok = Arc::clone(&healthy);
        let written = Arc::new(Mutex::new(Vec::<usize>::new()));
        let w = Arc::clone(&written);
        let mut store = MockMarketDataStore::new();
        store.expect_write_trades().returning(move |trades| {
            if ok.load(Ordering::Relaxed) {
                w.lock().push(trades.len());
                Ok(trades.len() as u64)
            } else {
                Err(PersistenceError::Connection("database down".to_string()))
            }
        });

        let service = StreamConsumer::new(
            log.clone(),
            Arc::new(store),
            Arc::new(quiet_fanout()),
            Topics::default(),
            fast_config(1),
        );
        let stats = service.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(cancel.clone()));

        wait_until(|| stats.flush_failures() >= 2).await;
        append(&log, &trade("AAPL", 2)).await;
        let polls = log.polls();
        wait_until(|| log.polls() > polls + 2).await;
        assert_eq!(stats.pending(), 1);

        healthy.store(true, Ordering::Relaxed);
        wait_until(|| stats.batches_flushed() == 2).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(*written.lock(), vec![1, 1]);
        assert_eq!(log.committed(TRADES, 0), Some(2));
    }
}
