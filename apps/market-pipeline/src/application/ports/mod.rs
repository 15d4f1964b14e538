//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `EventLogProducer`: append a keyed record to the durable log
//! - `EventLogConsumer`: read records as a consumer-group member, commit offsets
//! - `MarketDataStore`: symbol resolution and idempotent batch writes
//! - `FanoutPublisher`: best-effort live republish
//! - `BatchJob`: periodic ETL job invoked by the scheduler

mod batch_job_port;
mod event_log_port;
mod fanout_port;
mod market_data_store_port;

pub use batch_job_port::{BatchJob, JobError};
pub use event_log_port::{EventLogConsumer, EventLogProducer, LogError, LogRecord, Topics};
pub use fanout_port::{FanoutError, FanoutPublisher, NoOpFanout};
pub use market_data_store_port::{MarketDataStore, PersistenceError, SymbolId};

#[cfg(test)]
pub use event_log_port::{MockEventLogConsumer, MockEventLogProducer};
#[cfg(test)]
pub use fanout_port::MockFanoutPublisher;
#[cfg(test)]
pub use market_data_store_port::MockMarketDataStore;
