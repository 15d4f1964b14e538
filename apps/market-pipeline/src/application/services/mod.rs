//! Application Services
//!
//! Services that orchestrate the pipeline through its ports.
//!
//! - `EventPublisher`: feed queue to durable log
//! - `StreamConsumer`: durable log to relational store and fan-out
//! - `JobScheduler`: daily batch ETL jobs

mod event_publisher;
mod job_scheduler;
mod stream_consumer;

pub use event_publisher::{DEFAULT_FLUSH_TIMEOUT, EventPublisher, PublisherStats};
pub use job_scheduler::{DEFAULT_CHECK_INTERVAL, JobScheduler};
pub use stream_consumer::{ConsumerConfig, ConsumerStats, FlushError, StreamConsumer};
