//! Kafka adapters for the durable log ports.
//!
//! Records are keyed by symbol, so the broker's key partitioner keeps
//! every event of a symbol on one partition.

mod consumer;
mod producer;

pub use consumer::{DEFAULT_CONSUMER_GROUP, KafkaConsumer, consumer_config};
pub use producer::{DEFAULT_MESSAGE_TIMEOUT, KafkaProducer, producer_config};
