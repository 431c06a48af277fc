//! Message types flowing through the producer pipeline
//!
//! A message starts life as a [`ProducerRecord`] handed to
//! [`Producer::produce`](crate::Producer::produce), is staged as a
//! [`PendingMessage`] until it has a partition, and then lives in the
//! [`MessageBuffer`](crate::MessageBuffer) as a [`BufferedMessage`] until a
//! broker acknowledges it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A (topic, partition) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

// ============================================================================
// Producer Record
// ============================================================================

/// A record submitted by the application
///
/// ```rust
/// use tributary_client::ProducerRecord;
///
/// let record = ProducerRecord::new("orders", "order-42")
///     .key("customer-7")
///     .header("source", "checkout");
/// assert_eq!(record.topic, "orders");
/// ```
#[derive(Debug)]
pub struct ProducerRecord {
    /// Topic name
    pub topic: String,
    /// Message value
    pub value: Bytes,
    /// Optional message key, also used for partitioning when no partition key is set
    pub key: Option<Bytes>,
    /// Explicit partition; skips the partitioner entirely
    pub partition: Option<u32>,
    /// Key used only for partition selection
    pub partition_key: Option<Bytes>,
    /// Application headers, kept in insertion order
    pub headers: Vec<(String, Bytes)>,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            value: value.into(),
            key: None,
            partition: None,
            partition_key: None,
            headers: Vec::new(),
        }
    }

    /// Set the message key
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Pin the record to a partition
    pub fn partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Set a key that only influences partition selection
    pub fn partition_key(mut self, partition_key: impl Into<Bytes>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ============================================================================
// Pending Message
// ============================================================================

/// A message waiting for partition assignment
///
/// Not `Clone`: a pending message is moved, never copied, from the pending
/// queue into the buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingMessage {
    pub value: Bytes,
    pub key: Option<Bytes>,
    pub headers: Vec<(String, Bytes)>,
    pub topic: String,
    pub partition: Option<u32>,
    pub partition_key: Option<Bytes>,
    /// Milliseconds since the Unix epoch at the time of `produce()`
    pub create_time: i64,
}

impl PendingMessage {
    /// Stage a record, stamping it with the current wall-clock time
    pub fn from_record(record: ProducerRecord) -> Self {
        Self::with_create_time(record, now_millis())
    }

    pub fn with_create_time(record: ProducerRecord, create_time: i64) -> Self {
        Self {
            value: record.value,
            key: record.key,
            headers: record.headers,
            topic: record.topic,
            partition: record.partition,
            partition_key: record.partition_key,
            create_time,
        }
    }

    /// Bytes counted against the buffer's byte ceiling
    pub fn bytesize(&self) -> usize {
        self.value.len() + self.key.as_ref().map(|k| k.len()).unwrap_or(0)
    }

    /// The bytes that drive key-based partitioning, if any
    pub fn partitioning_key(&self) -> Option<&[u8]> {
        self.partition_key.as_deref().or(self.key.as_deref())
    }
}

// ============================================================================
// Buffered Message
// ============================================================================

/// A partition-assigned message awaiting acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub value: Bytes,
    pub key: Option<Bytes>,
    pub headers: Vec<(String, Bytes)>,
    pub create_time: i64,
    /// Buffer-wide insertion order
    pub sequence: u64,
}

impl BufferedMessage {
    pub fn bytesize(&self) -> usize {
        self.value.len() + self.key.as_ref().map(|k| k.len()).unwrap_or(0)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
