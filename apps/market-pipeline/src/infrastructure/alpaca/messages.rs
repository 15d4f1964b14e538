//! Alpaca WebSocket Message Types
//!
//! Wire format types for the stock data stream (`/v2/iex`, `/v2/sip`).
//! Every inbound object carries a `T` discriminator; the codec dispatches
//! on it and maps anything it does not handle to
//! [`AlpacaMessage::Unrecognized`].
//!
//! # Inbound
//!
//! - `success`: `connected` on open, `authenticated` after auth
//! - `error`: coded failure (auth, limits, syntax)
//! - `subscription`: current subscription set after a subscribe
//! - `t`: trade
//! - `b` / `u` / `d`: minute bar, corrected minute bar, daily bar
//!
//! # Outbound
//!
//! - `{"action":"auth","key":"...","secret":"..."}`
//! - `{"action":"subscribe","trades":[...],"bars":[...],"updatedBars":[...]}`
//!
//! # References
//!
//! - [Stock Streaming](https://docs.alpaca.markets/docs/real-time-stock-pricing-data)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Control Messages
// =============================================================================

/// Success message.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "success", "msg": "connected"}
/// {"T": "success", "msg": "authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Success kind.
    pub msg: SuccessKind,
}

/// Kind of success message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Socket accepted.
    Connected,
    /// Credentials accepted.
    Authenticated,
}

/// Error message with code and description.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 402, "msg": "auth failed"}
/// ```
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code.
    pub code: i32,
    /// Error description.
    #[serde(default)]
    pub msg: String,
}

impl ErrorMessage {
    /// Authentication-related error (401-404).
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self.code, 401..=404)
    }

    /// Limit-related error (405-407).
    #[must_use]
    pub const fn is_rate_limit_error(&self) -> bool {
        matches!(self.code, 405..=407)
    }
}

/// Subscription confirmation.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "subscription", "trades": ["AAPL"], "bars": ["AAPL"], "updatedBars": ["AAPL"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Subscribed trade symbols.
    #[serde(default)]
    pub trades: Vec<String>,
    /// Subscribed bar symbols.
    #[serde(default)]
    pub bars: Vec<String>,
    /// Subscribed corrected-bar symbols.
    #[serde(default, rename = "updatedBars")]
    pub updated_bars: Vec<String>,
    /// Subscribed daily-bar symbols.
    #[serde(default, rename = "dailyBars")]
    pub daily_bars: Vec<String>,
}

// =============================================================================
// Market Data Messages
// =============================================================================

/// Timestamp as sent on the wire.
///
/// The live feed uses RFC-3339 strings; replayed or synthetic frames may
/// carry an integer epoch instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// Integer epoch, unit inferred from magnitude.
    Epoch(i64),
    /// RFC-3339 string.
    Text(String),
}

/// Stock trade.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "t",
///   "i": 96921,
///   "S": "AAPL",
///   "x": "D",
///   "p": 126.55,
///   "s": 1,
///   "t": "2021-02-22T15:51:44.208Z",
///   "c": ["@", "I"],
///   "z": "C"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTradeMessage {
    /// Ticker symbol.
    #[serde(rename = "S")]
    pub symbol: String,
    /// Trade id (unique per exchange per day).
    #[serde(rename = "i", default)]
    pub trade_id: Option<i64>,
    /// Exchange code.
    #[serde(rename = "x", default)]
    pub exchange: Option<String>,
    /// Trade price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Trade size.
    #[serde(rename = "s")]
    pub size: Decimal,
    /// Trade timestamp.
    #[serde(rename = "t")]
    pub timestamp: WireTimestamp,
    /// Condition codes.
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,
    /// Tape.
    #[serde(rename = "z", default)]
    pub tape: Option<String>,
}

/// Kind of bar message, from its `T` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    /// `b`: minute bar.
    Minute,
    /// `u`: corrected minute bar, supersedes an earlier `b`.
    Updated,
    /// `d`: daily bar.
    Daily,
}

/// Stock bar (OHLCV).
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "b",
///   "S": "SPY",
///   "o": 388.985,
///   "h": 389.13,
///   "l": 388.975,
///   "c": 389.12,
///   "v": 49378,
///   "n": 461,
///   "vw": 389.062639,
///   "t": "2021-02-22T19:15:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBarMessage {
    /// Ticker symbol.
    #[serde(rename = "S")]
    pub symbol: String,
    /// Open price.
    #[serde(rename = "o")]
    pub open: Decimal,
    /// High price.
    #[serde(rename = "h")]
    pub high: Decimal,
    /// Low price.
    #[serde(rename = "l")]
    pub low: Decimal,
    /// Close price.
    #[serde(rename = "c")]
    pub close: Decimal,
    /// Volume.
    #[serde(rename = "v")]
    pub volume: i64,
    /// Number of trades.
    #[serde(rename = "n", default)]
    pub trade_count: i64,
    /// Volume-weighted average price.
    #[serde(rename = "vw", default)]
    pub vwap: Option<Decimal>,
    /// Bar timestamp.
    #[serde(rename = "t")]
    pub timestamp: WireTimestamp,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlpacaMessage {
    /// `success`.
    Success(SuccessMessage),
    /// `error`.
    Error(ErrorMessage),
    /// `subscription`.
    Subscription(SubscriptionMessage),
    /// `t`.
    Trade(StockTradeMessage),
    /// `b`, `u` or `d`.
    Bar(BarKind, StockBarMessage),
    /// Known-shaped type we do not consume (quotes, statuses, future types).
    Unrecognized(String),
}

// =============================================================================
// Outbound Requests
// =============================================================================

/// Authentication request.
///
/// # Wire Format (JSON)
/// ```json
/// {"action": "auth", "key": "PK...", "secret": "..."}
/// ```
#[derive(Clone, Serialize)]
pub struct AuthRequest {
    action: &'static str,
    key: String,
    secret: String,
}

impl AuthRequest {
    /// Build an auth request.
    #[must_use]
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            action: "auth",
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Subscribe request.
///
/// # Wire Format (JSON)
/// ```json
/// {"action": "subscribe", "trades": ["AAPL"], "bars": ["AAPL"], "updatedBars": ["AAPL"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Always "subscribe".
    pub action: &'static str,
    /// Trade symbols.
    pub trades: Vec<String>,
    /// Bar symbols.
    pub bars: Vec<String>,
    /// Corrected-bar symbols.
    #[serde(rename = "updatedBars", skip_serializing_if = "Vec::is_empty")]
    pub updated_bars: Vec<String>,
    /// Daily-bar symbols.
    #[serde(rename = "dailyBars", skip_serializing_if = "Vec::is_empty")]
    pub daily_bars: Vec<String>,
}

impl SubscriptionRequest {
    /// Subscribe `symbols` to trades and minute bars.
    #[must_use]
    pub fn subscribe(symbols: &[String]) -> Self {
        Self {
            action: "subscribe",
            trades: symbols.to_vec(),
            bars: symbols.to_vec(),
            updated_bars: Vec::new(),
            daily_bars: Vec::new(),
        }
    }

    /// Also subscribe to corrected minute bars.
    #[must_use]
    pub fn with_updated_bars(mut self) -> Self {
        self.updated_bars = self.bars.clone();
        self
    }

    /// Also subscribe to daily bars.
    #[must_use]
    pub fn with_daily_bars(mut self) -> Self {
        self.daily_bars = self.bars.clone();
        self
    }
}
