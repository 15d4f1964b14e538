//! Pending Batch
//!
//! Accumulates decoded events between flushes together with the log
//! positions they came from. Positions are tracked even for records that
//! failed to decode so a poison record does not pin its partition.
//!
//! The batch is size-bounded by the caller: [`PendingBatch::is_full`]
//! compares the number of tracked records against a threshold.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::market_data::{Bar, MarketEvent, Trade};

/// Position of a record in the durable log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogPosition {
    /// Topic name.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

impl LogPosition {
    /// Create a new position.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// The committed offset that acknowledges this record.
    ///
    /// Consumer groups commit the offset of the *next* record to read.
    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset + 1,
        }
    }
}

/// Buffered events awaiting a flush.
#[derive(Debug, Default)]
pub struct PendingBatch {
    trades: Vec<Trade>,
    written_trades: usize,
    bars: Vec<Bar>,
    high_water: BTreeMap<(String, i32), i64>,
    records: usize,
    opened_at: Option<Instant>,
}

impl PendingBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a decoded event read from `position`.
    pub fn push(&mut self, position: &LogPosition, event: MarketEvent) {
        self.track(position);
        match event {
            MarketEvent::Trade(trade) => self.trades.push(trade),
            MarketEvent::Bar(bar) => self.bars.push(bar),
        }
    }

    /// Track a record that produced no event (undecodable payload).
    pub fn skip(&mut self, position: &LogPosition) {
        self.track(position);
    }

    fn track(&mut self, position: &LogPosition) {
        if self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
        }
        self.records += 1;

        let entry = self
            .high_water
            .entry((position.topic.clone(), position.partition))
            .or_insert(position.offset);
        if position.offset > *entry {
            *entry = position.offset;
        }
    }

    /// Number of log records tracked (decoded or skipped) and not yet written.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records
    }

    /// Whether there is nothing to write and nothing to commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high_water.is_empty()
    }

    /// Whether the batch has reached `threshold` records.
    #[must_use]
    pub const fn is_full(&self, threshold: usize) -> bool {
        self.records >= threshold
    }

    /// Time since the first record was tracked.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        self.opened_at.map(|t| t.elapsed())
    }

    /// Buffered trades in log order.
    #[must_use]
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Buffered trades not yet written to the store.
    #[must_use]
    pub fn unwritten_trades(&self) -> &[Trade] {
        &self.trades[self.written_trades..]
    }

    /// Record that every buffered trade is in the store. Trades are
    /// append-only, so a retry after a later failure must skip them.
    pub fn mark_trades_written(&mut self) {
        self.written_trades = self.trades.len();
    }

    /// Buffered bars in log order.
    #[must_use]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Offsets to commit once this batch is persisted, one per partition.
    #[must_use]
    pub fn commit_positions(&self) -> Vec<LogPosition> {
        self.high_water
            .iter()
            .map(|((topic, partition), offset)| {
                LogPosition::new(topic.clone(), *partition, *offset).next()
            })
            .collect()
    }

    /// Whether events were written but their positions are still uncommitted.
    #[must_use]
    pub fn awaiting_commit(&self) -> bool {
        self.records == 0 && !self.high_water.is_empty()
    }

    /// Drop the events once the store holds them, keeping their positions.
    ///
    /// Records tracked afterwards start a new batch whose commit also
    /// covers the retained positions.
    pub fn mark_written(&mut self) {
        self.trades.clear();
        self.written_trades = 0;
        self.bars.clear();
        self.records = 0;
        self.opened_at = None;
    }

    /// Drop all buffered state.
    pub fn clear(&mut self) {
        self.trades.clear();
        self.written_trades = 0;
        self.bars.clear();
        self.high_water.clear();
        self.records = 0;
        self.opened_at = None;
    }
}
