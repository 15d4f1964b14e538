//! In-memory market data store.
//!
//! Same contract as the Postgres store: trades append, bars upsert on
//! `(symbol id, timeframe, timestamp)` with the last write winning, and
//! symbol ids are unique even when first sight races. Writes can be made
//! to fail on demand to exercise the consumer's retry path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{MarketDataStore, PersistenceError, SymbolId};
use crate::domain::market_data::{Bar, EpochNanos, Symbol, Timeframe, Trade, latest_bars};

type BarRow = (SymbolId, Timeframe, EpochNanos);

#[derive(Debug, Default)]
struct StoreInner {
    symbols: HashMap<Symbol, SymbolId>,
    next_id: SymbolId,
    trades: Vec<(SymbolId, Trade)>,
    bars: Vec<Bar>,
    bar_index: HashMap<BarRow, usize>,
}

impl StoreInner {
    fn resolve(&mut self, symbol: &Symbol) -> SymbolId {
        if let Some(id) = self.symbols.get(symbol) {
            return *id;
        }
        self.next_id += 1;
        self.symbols.insert(symbol.clone(), self.next_id);
        self.next_id
    }
}

/// In-memory [`MarketDataStore`].
#[derive(Debug, Default)]
pub struct InMemoryMarketDataStore {
    inner: Mutex<StoreInner>,
    unavailable: AtomicBool,
    failing_writes: AtomicUsize,
}

impl InMemoryMarketDataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until set back to available.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail the next `count` writes.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Persisted trades in write order.
    #[must_use]
    pub fn trades(&self) -> Vec<Trade> {
        self.inner.lock().trades.iter().map(|(_, t)| t.clone()).collect()
    }

    /// Persisted bars, one per key, in first-write order.
    #[must_use]
    pub fn bars(&self) -> Vec<Bar> {
        self.inner.lock().bars.clone()
    }

    /// Id assigned to `symbol`, if it has been seen.
    #[must_use]
    pub fn symbol_id(&self, symbol: &Symbol) -> Option<SymbolId> {
        self.inner.lock().symbols.get(symbol).copied()
    }

    /// Number of distinct symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.inner.lock().symbols.len()
    }

    fn check_available(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Connection(
                "store unavailable".to_string(),
            ));
        }
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(PersistenceError::Query("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataStore for InMemoryMarketDataStore {
    async fn resolve_or_create_symbol(
        &self,
        symbol: &Symbol,
    ) -> Result<SymbolId, PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Connection(
                "store unavailable".to_string(),
            ));
        }
        Ok(self.inner.lock().resolve(symbol))
    }

    async fn write_trades(&self, trades: &[Trade]) -> Result<u64, PersistenceError> {
        self.check_available()?;

        let mut inner = self.inner.lock();
        for trade in trades {
            let id = inner.resolve(&trade.symbol);
            inner.trades.push((id, trade.clone()));
        }
        Ok(trades.len() as u64)
    }

    async fn write_bars(&self, bars: &[Bar]) -> Result<u64, PersistenceError> {
        self.check_available()?;

        let collapsed = latest_bars(bars);
        let mut inner = self.inner.lock();
        for bar in &collapsed {
            let id = inner.resolve(&bar.symbol);
            let row = (id, bar.timeframe, bar.timestamp);
            match inner.bar_index.get(&row).copied() {
                Some(index) => inner.bars[index] = bar.clone(),
                None => {
                    let index = inner.bars.len();
                    inner.bars.push(bar.clone());
                    inner.bar_index.insert(row, index);
                }
            }
        }
        Ok(collapsed.len() as u64)
    }
}
