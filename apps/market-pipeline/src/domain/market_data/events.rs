//! Trade and bar events.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{EpochNanos, Symbol};

// =============================================================================
// Trade
// =============================================================================

/// A single executed trade.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "symbol": "AAPL",
///   "price": "150.25",
///   "size": "100",
///   "timestamp": 1700000000000000000,
///   "exchange": "V",
///   "conditions": ["@"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Execution price.
    pub price: Decimal,
    /// Shares traded (fractional sizes allowed).
    pub size: Decimal,
    /// Exchange-supplied execution time.
    pub timestamp: EpochNanos,
    /// Exchange code, empty when the feed omits it.
    #[serde(default)]
    pub exchange: String,
    /// Trade condition codes.
    #[serde(default)]
    pub conditions: Vec<String>,
}

// =============================================================================
// Bar
// =============================================================================

/// Bar aggregation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// One-minute bar (including corrected minute bars).
    #[serde(rename = "1m")]
    Minute,
    /// Daily bar.
    #[serde(rename = "1d")]
    Day,
}

impl Timeframe {
    /// Short code stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "1m",
            Self::Day => "1d",
        }
    }
}

/// OHLCV bar.
///
/// Later bars for the same [`BarKey`] supersede earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Aggregation period.
    pub timeframe: Timeframe,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Shares traded.
    pub volume: i64,
    /// Number of trades in the bar.
    #[serde(default)]
    pub trade_count: i64,
    /// Volume-weighted average price, when supplied.
    #[serde(default)]
    pub vwap: Option<Decimal>,
    /// Bar timestamp as supplied by the feed.
    pub timestamp: EpochNanos,
}

impl Bar {
    /// Identity used for upserts.
    #[must_use]
    pub fn key(&self) -> BarKey {
        BarKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            timestamp: self.timestamp,
        }
    }
}

/// Natural key of a bar row: one bar per symbol per timeframe per timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BarKey {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Aggregation period.
    pub timeframe: Timeframe,
    /// Bar timestamp.
    pub timestamp: EpochNanos,
}

/// Collapse bars sharing a key so only the last one survives.
///
/// Output keeps the position of each key's first appearance.
#[must_use]
pub fn latest_bars(bars: &[Bar]) -> Vec<Bar> {
    let mut index: HashMap<BarKey, usize> = HashMap::with_capacity(bars.len());
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());

    for bar in bars {
        match index.get(&bar.key()) {
            Some(&slot) => out[slot] = bar.clone(),
            None => {
                index.insert(bar.key(), out.len());
                out.push(bar.clone());
            }
        }
    }

    out
}

// =============================================================================
// Event envelope
// =============================================================================

/// Kind of market event; one durable-log topic and one fan-out stream each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Trade events.
    Trade,
    /// Bar events.
    Bar,
}

impl EventKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Bar => "bar",
        }
    }
}

/// A canonical event of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    /// Trade event.
    Trade(Trade),
    /// Bar event.
    Bar(Bar),
}

impl MarketEvent {
    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Trade(_) => EventKind::Trade,
            Self::Bar(_) => EventKind::Bar,
        }
    }

    /// Symbol the event belongs to (the partition key).
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Trade(trade) => &trade.symbol,
            Self::Bar(bar) => &bar.symbol,
        }
    }

    /// Serialize the canonical JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Trade(trade) => serde_json::to_vec(trade),
            Self::Bar(bar) => serde_json::to_vec(bar),
        }
    }

    /// Parse a payload known to carry an event of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid event of that kind.
    pub fn from_json(kind: EventKind, payload: &[u8]) -> Result<Self, serde_json::Error> {
        match kind {
            EventKind::Trade => serde_json::from_slice(payload).map(Self::Trade),
            EventKind::Bar => serde_json::from_slice(payload).map(Self::Bar),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn bar(symbol: &str, ts: i64, close: Decimal) -> Bar {
        Bar {
            symbol: Symbol::new(symbol).unwrap(),
            timeframe: Timeframe::Minute,
            open: dec!(150.0),
            high: dec!(151.0),
            low: dec!(149.5),
            close,
            volume: 1_000,
            trade_count: 12,
            vwap: Some(dec!(150.3)),
            timestamp: EpochNanos::new(ts).unwrap(),
        }
    }

    #[test]
    fn trade_json_shape() {
        let trade = Trade {
            symbol: Symbol::new("AAPL").unwrap(),
            price: dec!(150.25),
            size: dec!(100),
            timestamp: EpochNanos::from_epoch(1_700_000_000_000).unwrap(),
            exchange: "V".to_string(),
            conditions: vec!["@".to_string()],
        };

        let value: serde_json::Value =
            serde_json::from_slice(&MarketEvent::Trade(trade.clone()).to_json().unwrap()).unwrap();
        assert_eq!(value["symbol"], "AAPL");
        assert_eq!(value["price"], "150.25");
        assert_eq!(value["timestamp"], 1_700_000_000_000_000_000_i64);

        let parsed: Trade = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, trade);
    }

    #[test]
    fn bar_timeframe_serializes_short_code() {
        let json = serde_json::to_value(bar("MSFT", 1, dec!(1))).unwrap();
        assert_eq!(json["timeframe"], "1m");
        assert_eq!(Timeframe::Day.as_str(), "1d");
    }

    #[test]
    fn latest_bars_keeps_last_write() {
        let bars = vec![
            bar("AAPL", 60, dec!(150.0)),
            bar("MSFT", 60, dec!(300.0)),
            bar("AAPL", 60, dec!(150.5)),
            bar("AAPL", 120, dec!(151.0)),
        ];

        let collapsed = latest_bars(&bars);

        assert_eq!(collapsed.len(), 3);
        assert_eq!(collapsed[0].symbol.as_str(), "AAPL");
        assert_eq!(collapsed[0].close, dec!(150.5));
        assert_eq!(collapsed[1].symbol.as_str(), "MSFT");
        assert_eq!(collapsed[2].close, dec!(151.0));
    }

    #[test]
    fn timeframe_distinguishes_keys() {
        let minute = bar("AAPL", 60, dec!(150.0));
        let mut daily = minute.clone();
        daily.timeframe = Timeframe::Day;

        assert_eq!(latest_bars(&[minute, daily]).len(), 2);
    }

    #[test]
    fn event_kind_and_symbol() {
        let event = MarketEvent::Bar(bar("spy", 60, dec!(450)));
        assert_eq!(event.kind(), EventKind::Bar);
        assert_eq!(event.symbol().as_str(), "SPY");
    }
}
