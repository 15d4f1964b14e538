//! Market Data Types
//!
//! The two canonical event shapes (trades and bars) that flow through the
//! pipeline unchanged from the feed adapter to the persistence sink.
//!
//! # Timestamps
//!
//! Every event carries an [`EpochNanos`]: nanoseconds since the Unix epoch.
//! The feed adapter is the only place that converts from other units.

mod events;
mod symbol;
mod timestamp;

pub use events::{Bar, BarKey, EventKind, MarketEvent, Timeframe, Trade, latest_bars};
pub use symbol::Symbol;
pub use timestamp::EpochNanos;
