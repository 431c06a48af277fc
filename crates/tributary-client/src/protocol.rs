//! Produce request/response types exchanged with a [`Broker`](crate::Broker)
//!
//! These are the typed shapes of a produce round trip. How they are framed
//! on a socket is the broker connection's business; the producer only builds
//! requests and interprets responses.

use crate::error::{Error, Result};
use crate::message::{BufferedMessage, TopicPartition};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tributary_core::compression::CompressionCodec;
use tributary_core::hash::crc32;

// ============================================================================
// Acknowledgments
// ============================================================================

/// How many replicas must confirm a write before the broker answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredAcks {
    /// Fire and forget: the broker sends no response
    None,
    /// The partition leader has written the messages
    #[default]
    Leader,
    /// Every in-sync replica has written the messages
    All,
}

impl RequiredAcks {
    /// Kafka wire value (0, 1, -1)
    pub fn as_i16(&self) -> i16 {
        match self {
            RequiredAcks::None => 0,
            RequiredAcks::Leader => 1,
            RequiredAcks::All => -1,
        }
    }

    /// Whether the broker answers produce requests at all
    pub fn expects_response(&self) -> bool {
        !matches!(self, RequiredAcks::None)
    }
}

// ============================================================================
// Request
// ============================================================================

/// Messages of one partition, encoded (and possibly compressed) as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionBatch {
    pub topic: String,
    pub partition: u32,
    pub codec: CompressionCodec,
    pub message_count: usize,
    /// CRC32 of `payload`
    pub crc: u32,
    pub payload: Bytes,
}

impl PartitionBatch {
    /// Encode messages for one partition.
    ///
    /// The codec is applied only when the batch holds at least
    /// `compression_threshold` messages; smaller batches go out uncompressed.
    pub fn encode<'a>(
        topic_partition: &TopicPartition,
        messages: impl IntoIterator<Item = &'a BufferedMessage>,
        codec: CompressionCodec,
        compression_threshold: usize,
    ) -> Result<Self> {
        let messages: Vec<&BufferedMessage> = messages.into_iter().collect();
        let encoded = bincode::serialize(&messages)?;

        let codec = if codec.is_compressed() && messages.len() >= compression_threshold {
            codec
        } else {
            CompressionCodec::None
        };
        let payload = codec.compress(&encoded)?;

        Ok(Self {
            topic: topic_partition.topic.clone(),
            partition: topic_partition.partition,
            codec,
            message_count: messages.len(),
            crc: crc32(&payload),
            payload,
        })
    }

    /// Verify, decompress and decode the batch
    pub fn decode(&self) -> Result<Vec<BufferedMessage>> {
        let actual = crc32(&self.payload);
        if actual != self.crc {
            return Err(Error::CorruptBatch {
                topic_partition: self.topic_partition(),
                expected: self.crc,
                actual,
            });
        }
        let encoded = self.codec.decompress(&self.payload)?;
        Ok(bincode::deserialize(&encoded)?)
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// One produce request addressed to a single broker
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub required_acks: RequiredAcks,
    /// How long the broker may wait for replica acknowledgments
    pub timeout: Duration,
    pub batches: Vec<PartitionBatch>,
}

// ============================================================================
// Response
// ============================================================================

/// Per-partition error reported by a broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum PartitionErrorCode {
    #[error("corrupt message")]
    CorruptMessage,
    #[error("unknown topic or partition")]
    UnknownTopicOrPartition,
    #[error("leader not available")]
    LeaderNotAvailable,
    #[error("not leader for partition")]
    NotLeaderForPartition,
    #[error("request timed out")]
    RequestTimedOut,
    #[error("message size too large")]
    MessageSizeTooLarge,
    #[error("not enough replicas")]
    NotEnoughReplicas,
    #[error("not enough replicas after append")]
    NotEnoughReplicasAfterAppend,
}

impl PartitionErrorCode {
    /// Errors that mean our view of partition leadership is out of date
    pub fn invalidates_metadata(&self) -> bool {
        matches!(
            self,
            PartitionErrorCode::LeaderNotAvailable | PartitionErrorCode::NotLeaderForPartition
        )
    }
}

/// Outcome for one partition of a produce request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionResponse {
    pub topic: String,
    pub partition: u32,
    pub error: Option<PartitionErrorCode>,
    /// Offset assigned to the first message of the batch
    pub base_offset: Option<u64>,
}

impl PartitionResponse {
    pub fn ok(topic_partition: &TopicPartition, base_offset: u64) -> Self {
        Self {
            topic: topic_partition.topic.clone(),
            partition: topic_partition.partition,
            error: None,
            base_offset: Some(base_offset),
        }
    }

    pub fn failed(topic_partition: &TopicPartition, error: PartitionErrorCode) -> Self {
        Self {
            topic: topic_partition.topic.clone(),
            partition: topic_partition.partition,
            error: Some(error),
            base_offset: None,
        }
    }
}

/// Broker answer to a [`ProduceRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProduceResponse {
    pub partitions: Vec<PartitionResponse>,
}
