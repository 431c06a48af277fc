use crate::cluster::ClusterError;
use crate::message::TopicPartition;
use thiserror::Error;
use tributary_core::compression::CompressionError;

#[derive(Error, Debug)]
pub enum Error {
    /// The pending queue plus buffer reached a configured ceiling. Nothing was
    /// enqueued; drain with `deliver_messages()` before producing more.
    #[error("Buffer overflow: {0}")]
    BufferOverflow(String),

    /// Retries were exhausted with messages still undelivered. The messages
    /// stay buffered for a later `deliver_messages()` call.
    #[error("Failed to deliver messages after {attempts} attempts to {}{}", format_partitions(.partitions), format_unassigned(.unassigned))]
    DeliveryFailed {
        /// Partitions that still hold buffered messages
        partitions: Vec<TopicPartition>,
        /// Messages that never got a partition assigned
        unassigned: usize,
        attempts: u32,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Producer has been shut down")]
    Shutdown,

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Corrupt batch for {topic_partition}: crc {actual:#010x}, expected {expected:#010x}")]
    CorruptBatch {
        topic_partition: TopicPartition,
        expected: u32,
        actual: u32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

fn format_partitions(partitions: &[TopicPartition]) -> String {
    if partitions.is_empty() {
        return "no partitions".to_string();
    }
    partitions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_unassigned(unassigned: &usize) -> String {
    if *unassigned == 0 {
        String::new()
    } else {
        format!(" ({} messages without a partition)", unassigned)
    }
}
