//! In-memory adapters for the driven ports.
//!
//! Used by tests and by local runs without a broker or database.

mod event_log;
mod fanout;
mod store;

pub use event_log::InMemoryEventLog;
pub use fanout::RecordingFanout;
pub use store::InMemoryMarketDataStore;
