//! Domain Layer - Canonical market data types and pure policies.
//!
//! Nothing in this layer performs I/O. Types here are shared by the
//! ingest side (feed adapter, publisher) and the stream side (consumer,
//! persistence sink, fan-out).

/// Canonical trade and bar events, symbols and timestamps.
pub mod market_data;

/// In-memory batch accumulation for the stream consumer.
pub mod batch;

/// Exponential backoff with jitter.
pub mod backoff;

mod errors;

pub use errors::DomainError;
