//! In-memory partitioned log.
//!
//! Stands in for the broker in tests and local runs. Records are routed
//! to a partition by hashing the key, so one symbol always lands on one
//! partition. A single consumer member reads every partition; commits are
//! tracked per partition and [`InMemoryEventLog::restart_consumer`]
//! rewinds to them, which is how redelivery after a crash is exercised.

use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::application::ports::{EventLogConsumer, EventLogProducer, LogError, LogRecord};
use crate::domain::batch::LogPosition;

#[derive(Debug, Clone)]
struct Stored {
    key: String,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct LogInner {
    // topic -> partition -> records
    topics: BTreeMap<String, Vec<Vec<Stored>>>,
    committed: HashMap<(String, i32), i64>,
    cursors: HashMap<(String, i32), i64>,
    failing_sends: usize,
    paused: bool,
    polls: u64,
}

/// Partitioned in-memory log implementing both log ports.
#[derive(Debug)]
pub struct InMemoryEventLog {
    partitions: usize,
    inner: Mutex<LogInner>,
    appended: Notify,
}

impl InMemoryEventLog {
    /// Create a log with `partitions` partitions per topic (at least one).
    #[must_use]
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            inner: Mutex::new(LogInner::default()),
            appended: Notify::new(),
        }
    }

    /// Reject the next `count` sends.
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.lock().failing_sends = count;
    }

    /// Partition a key is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() % self.partitions as u64) as i32;
        index
    }

    /// Committed offset (next to read) for a partition.
    #[must_use]
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.inner
            .lock()
            .committed
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// All records in a topic, partition by partition.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        let inner = self.inner.lock();
        let Some(partitions) = inner.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records.iter().enumerate().map(move |(offset, stored)| {
                    to_record(topic, partition, offset, stored)
                })
            })
            .collect()
    }

    /// Simulate a consumer crash: uncommitted records are read again.
    pub fn restart_consumer(&self) {
        let mut inner = self.inner.lock();
        inner.cursors = inner.committed.clone();
        inner.paused = false;
    }

    /// Whether fetching is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Number of `poll` calls so far.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.inner.lock().polls
    }

    fn next_record(&self) -> Option<LogRecord> {
        let mut inner = self.inner.lock();
        if inner.paused {
            return None;
        }
        let LogInner {
            topics, cursors, ..
        } = &mut *inner;

        for (topic, partitions) in topics.iter() {
            for (index, records) in partitions.iter().enumerate() {
                let partition = i32::try_from(index).unwrap_or(i32::MAX);
                let cursor = cursors.entry((topic.clone(), partition)).or_insert(0);
                let Ok(offset) = usize::try_from(*cursor) else {
                    continue;
                };
                if let Some(stored) = records.get(offset) {
                    let record = to_record(topic, index, offset, stored);
                    *cursor += 1;
                    return Some(record);
                }
            }
        }
        None
    }
}

fn to_record(topic: &str, partition: usize, offset: usize, stored: &Stored) -> LogRecord {
    LogRecord {
        position: LogPosition::new(
            topic,
            i32::try_from(partition).unwrap_or(i32::MAX),
            i64::try_from(offset).unwrap_or(i64::MAX),
        ),
        key: Some(stored.key.clone()),
        payload: stored.payload.clone(),
    }
}

#[async_trait]
impl EventLogProducer for InMemoryEventLog {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), LogError> {
        let partition = self.partition_for(key);
        {
            let mut inner = self.inner.lock();
            if inner.failing_sends > 0 {
                inner.failing_sends -= 1;
                return Err(LogError::PublishFailed {
                    topic: topic.to_string(),
                    message: "injected failure".to_string(),
                });
            }

            let partitions = inner
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions]);
            let index = usize::try_from(partition).unwrap_or(0);
            partitions[index].push(Stored {
                key: key.to_string(),
                payload: payload.to_vec(),
            });
        }
        self.appended.notify_waiters();
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), LogError> {
        Ok(())
    }
}

#[async_trait]
impl EventLogConsumer for InMemoryEventLog {
    async fn poll(&self, timeout: Duration) -> Result<Option<LogRecord>, LogError> {
        self.inner.lock().polls += 1;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let appended = self.appended.notified();
            if let Some(record) = self.next_record() {
                return Ok(Some(record));
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&self, positions: &[LogPosition]) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        for position in positions {
            inner
                .committed
                .insert((position.topic.clone(), position.partition), position.offset);
        }
        Ok(())
    }

    fn pause(&self) -> Result<(), LogError> {
        self.inner.lock().paused = true;
        Ok(())
    }

    fn resume(&self) -> Result<(), LogError> {
        self.inner.lock().paused = false;
        self.appended.notify_waiters();
        Ok(())
    }
}
