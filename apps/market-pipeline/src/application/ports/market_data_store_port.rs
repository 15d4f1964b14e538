//! Market Data Store Port (Driven Port)
//!
//! The final, durable write path. Every method is idempotent under
//! redelivery: trades tolerate duplicate rows, bars upsert on
//! `(symbol id, timeframe, timestamp)`, and symbol creation tolerates
//! concurrent first sight.

use async_trait::async_trait;

use crate::domain::market_data::{Bar, Symbol, Trade};

/// Internal surrogate key for a ticker.
pub type SymbolId = i64;

/// Errors from persistence operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    /// Database connection error.
    #[error("database connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Data integrity error.
    #[error("data integrity error: {0}")]
    Integrity(String),
}

/// Port for the relational market data store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataStore: Send + Sync {
    /// Look up the internal id for `symbol`, creating it on first sight.
    ///
    /// Concurrent callers racing on a new ticker all receive the same id.
    async fn resolve_or_create_symbol(
        &self,
        symbol: &Symbol,
    ) -> Result<SymbolId, PersistenceError>;

    /// Append trades atomically. Returns the number of rows written.
    async fn write_trades(&self, trades: &[Trade]) -> Result<u64, PersistenceError>;

    /// Upsert bars atomically, last write wins. Returns rows affected.
    async fn write_bars(&self, bars: &[Bar]) -> Result<u64, PersistenceError>;
}
