//! Kafka producer adapter.
//!
//! One request in flight per connection and full acknowledgement keep
//! per-partition order intact across retries.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use crate::application::ports::{EventLogProducer, LogError};

/// Default delivery bound for one record.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the producer client configuration.
#[must_use]
pub fn producer_config(bootstrap_servers: &str, message_timeout: Duration) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", bootstrap_servers)
        .set("acks", "all")
        .set("max.in.flight.requests.per.connection", "1")
        .set("retries", "3")
        .set("enable.idempotence", "false")
        .set(
            "message.timeout.ms",
            message_timeout.as_millis().to_string(),
        );
    config
}

/// [`EventLogProducer`] backed by `rdkafka`.
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    message_timeout: Duration,
}

impl KafkaProducer {
    /// Create a producer. No broker connection is made until first send.
    ///
    /// # Errors
    ///
    /// Returns an error if the client configuration is rejected.
    pub fn new(bootstrap_servers: &str, message_timeout: Duration) -> Result<Self, LogError> {
        let producer = producer_config(bootstrap_servers, message_timeout)
            .create()
            .map_err(|e| LogError::Connection {
                message: e.to_string(),
            })?;

        tracing::info!(bootstrap_servers, "Kafka producer created");
        Ok(Self {
            producer,
            message_timeout,
        })
    }
}

impl std::fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("message_timeout", &self.message_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventLogProducer for KafkaProducer {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), LogError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, Timeout::After(self.message_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| LogError::PublishFailed {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn flush(&self, timeout: Duration) -> Result<(), LogError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| LogError::Connection {
                message: format!("flush task failed: {e}"),
            })?
            .map_err(|e| LogError::Connection {
                message: format!("flush failed: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_settings() {
        let config = producer_config("localhost:9092", Duration::from_millis(5000));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("max.in.flight.requests.per.connection"), Some("1"));
        assert_eq!(config.get("retries"), Some("3"));
        assert_eq!(config.get("message.timeout.ms"), Some("5000"));
    }
}
