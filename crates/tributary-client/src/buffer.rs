//! Partition-assigned messages awaiting acknowledgment
//!
//! The buffer is the single record of what still has to be delivered. It
//! outlives individual send attempts and `deliver_messages()` calls; entries
//! leave it only when a broker acknowledges them, when acknowledgments are
//! disabled, or when the application clears it.
//!
//! Messages of one partition are kept in insertion order. Acknowledgment
//! removes a prefix, so a retry always resends the remaining messages in the
//! order they were produced.

use crate::message::{BufferedMessage, PendingMessage, TopicPartition};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Messages keyed by destination partition
#[derive(Debug, Default)]
pub struct MessageBuffer {
    partitions: BTreeMap<TopicPartition, VecDeque<BufferedMessage>>,
    size: usize,
    bytesize: usize,
    next_sequence: u64,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a pending message into its partition's queue.
    ///
    /// Returns the sequence number assigned to the message.
    pub fn write(&mut self, topic_partition: TopicPartition, message: PendingMessage) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let buffered = BufferedMessage {
            value: message.value,
            key: message.key,
            headers: message.headers,
            create_time: message.create_time,
            sequence,
        };
        self.push(topic_partition, buffered);
        sequence
    }

    fn push(&mut self, topic_partition: TopicPartition, message: BufferedMessage) {
        self.size += 1;
        self.bytesize += message.bytesize();
        self.partitions
            .entry(topic_partition)
            .or_default()
            .push_back(message);
    }

    /// Remove the first `count` messages of a partition after a broker
    /// acknowledged them. Returns how many were removed.
    pub fn acknowledge(&mut self, topic_partition: &TopicPartition, count: usize) -> usize {
        let Some(queue) = self.partitions.get_mut(topic_partition) else {
            return 0;
        };

        let count = count.min(queue.len());
        for message in queue.drain(..count) {
            self.size -= 1;
            self.bytesize -= message.bytesize();
        }
        if queue.is_empty() {
            self.partitions.remove(topic_partition);
        }

        debug!("Acknowledged {} messages for {}", count, topic_partition);
        count
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.partitions.clear();
        self.size = 0;
        self.bytesize = 0;
    }

    /// Total message count across all partitions
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bytesize(&self) -> usize {
        self.bytesize
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Partitions with at least one message, sorted by topic then partition
    pub fn partitions(&self) -> impl Iterator<Item = &TopicPartition> {
        self.partitions.keys()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(|tp| tp.topic.as_str())
    }

    /// Messages of one partition in send order
    pub fn messages_for(&self, topic_partition: &TopicPartition) -> Option<&VecDeque<BufferedMessage>> {
        self.partitions.get(topic_partition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, &VecDeque<BufferedMessage>)> {
        self.partitions.iter()
    }
}
