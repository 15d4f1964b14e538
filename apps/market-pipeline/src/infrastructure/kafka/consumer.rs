//! Kafka consumer-group adapter.
//!
//! Auto commit is off; offsets move only through
//! [`EventLogConsumer::commit`], synchronously. While a batch is held the
//! assignment is paused and `recv` keeps running, which keeps the member
//! inside `max.poll.interval.ms`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};

use crate::application::ports::{EventLogConsumer, LogError, LogRecord, Topics};
use crate::domain::batch::LogPosition;

/// Default consumer group.
pub const DEFAULT_CONSUMER_GROUP: &str = "market-stream-service";

/// Build the consumer client configuration.
#[must_use]
pub fn consumer_config(bootstrap_servers: &str, group_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", bootstrap_servers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("enable.partition.eof", "false");
    config
}

/// [`EventLogConsumer`] backed by an `rdkafka` stream consumer.
#[derive(Clone)]
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    group_id: String,
}

impl KafkaConsumer {
    /// Create a group member subscribed to both topics.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or subscribed.
    pub fn new(bootstrap_servers: &str, group_id: &str, topics: &Topics) -> Result<Self, LogError> {
        let consumer: StreamConsumer = consumer_config(bootstrap_servers, group_id)
            .create()
            .map_err(|e| LogError::Connection {
                message: e.to_string(),
            })?;

        consumer
            .subscribe(&topics.all())
            .map_err(|e| LogError::Connection {
                message: format!("subscribe failed: {e}"),
            })?;

        tracing::info!(
            bootstrap_servers,
            group_id,
            topics = ?topics.all(),
            "Kafka consumer subscribed"
        );
        Ok(Self {
            consumer: Arc::new(consumer),
            group_id: group_id.to_string(),
        })
    }
}

impl std::fmt::Debug for KafkaConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaConsumer")
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventLogConsumer for KafkaConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<LogRecord>, LogError> {
        let Ok(received) = tokio::time::timeout(timeout, self.consumer.recv()).await else {
            return Ok(None);
        };

        let message = received.map_err(|e| LogError::ReceiveFailed {
            message: e.to_string(),
        })?;

        Ok(Some(LogRecord {
            position: LogPosition::new(message.topic(), message.partition(), message.offset()),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().unwrap_or_default().to_vec(),
        }))
    }

    async fn commit(&self, positions: &[LogPosition]) -> Result<(), LogError> {
        if positions.is_empty() {
            return Ok(());
        }

        let mut offsets = TopicPartitionList::new();
        for position in positions {
            offsets
                .add_partition_offset(
                    &position.topic,
                    position.partition,
                    Offset::Offset(position.offset),
                )
                .map_err(|e| LogError::CommitFailed {
                    message: e.to_string(),
                })?;
        }

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| LogError::CommitFailed {
                message: format!("commit task failed: {e}"),
            })?
            .map_err(|e| LogError::CommitFailed {
                message: e.to_string(),
            })
    }

    fn pause(&self) -> Result<(), LogError> {
        let assignment = self.consumer.assignment().map_err(flow_control)?;
        self.consumer.pause(&assignment).map_err(flow_control)
    }

    fn resume(&self) -> Result<(), LogError> {
        let assignment = self.consumer.assignment().map_err(flow_control)?;
        self.consumer.resume(&assignment).map_err(flow_control)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn flow_control(e: rdkafka::error::KafkaError) -> LogError {
    LogError::FlowControl {
        message: e.to_string(),
    }
}
