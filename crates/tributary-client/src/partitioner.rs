//! Partition selection
//!
//! A [`Partitioner`] maps a message onto one of a topic's partitions. The
//! default implementation hashes the partition key (or, if absent, the
//! message key) with Kafka-compatible murmur2, so related messages land on
//! the same partition as long as the partition count does not change.
//! Messages with neither key are spread uniformly at random.

use crate::message::PendingMessage;
use tributary_core::hash::murmur2_partition;

/// Maps a message to a partition index in `[0, partition_count)`.
///
/// Implementations must be deterministic for keyed messages: the same key
/// and partition count always yield the same partition. Callers never pass a
/// zero partition count.
pub trait Partitioner: Send + Sync {
    fn partition(&self, partition_count: u32, message: &PendingMessage) -> u32;
}

/// Murmur2 over the partitioning key, random for keyless messages
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPartitioner;

impl Partitioner for DefaultPartitioner {
    fn partition(&self, partition_count: u32, message: &PendingMessage) -> u32 {
        match message.partitioning_key() {
            Some(key) => murmur2_partition(key, partition_count),
            None => rand_partition(partition_count),
        }
    }
}

impl<F> Partitioner for F
where
    F: Fn(u32, &PendingMessage) -> u32 + Send + Sync,
{
    fn partition(&self, partition_count: u32, message: &PendingMessage) -> u32 {
        self(partition_count, message)
    }
}

fn rand_partition(partition_count: u32) -> u32 {
    rand::random::<u32>() % partition_count
}
