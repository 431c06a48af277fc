//! Moving pending messages into the buffer
//!
//! Assignment walks the pending queue in FIFO order and gives every message
//! a concrete partition: the explicit one if the record carried it,
//! otherwise the partitioner's choice for the topic's current partition
//! count. When a topic's metadata cannot be resolved the pass stops there.
//! Messages already moved stay in the buffer, the rest stay queued in order,
//! and the cluster is marked stale so the next attempt refreshes first.

use crate::buffer::MessageBuffer;
use crate::cluster::{Cluster, ClusterError};
use crate::message::TopicPartition;
use crate::partitioner::Partitioner;
use crate::pending::PendingMessageQueue;
use std::collections::HashMap;
use tracing::{debug, error};

/// Result of one assignment pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentOutcome {
    /// Every pending message now has a partition
    Complete { assigned: usize },
    /// A metadata lookup failed; the cluster has been marked stale
    MetadataStale {
        assigned: usize,
        remaining: usize,
        topic: String,
        error: ClusterError,
    },
}

impl AssignmentOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, AssignmentOutcome::Complete { .. })
    }

    pub fn assigned(&self) -> usize {
        match self {
            AssignmentOutcome::Complete { assigned } => *assigned,
            AssignmentOutcome::MetadataStale { assigned, .. } => *assigned,
        }
    }
}

/// Assign partitions to pending messages and move them into the buffer
pub async fn assign_partitions(
    pending: &mut PendingMessageQueue,
    buffer: &mut MessageBuffer,
    cluster: &dyn Cluster,
    partitioner: &dyn Partitioner,
) -> AssignmentOutcome {
    // Partition counts resolved during this pass
    let mut partition_counts: HashMap<String, u32> = HashMap::new();
    let mut assigned = 0;

    while let Some(message) = pending.pop_front() {
        let partition = match message.partition {
            Some(partition) => partition,
            None => {
                let count = match partition_counts.get(&message.topic) {
                    Some(count) => *count,
                    None => match partition_count(cluster, &message.topic).await {
                        Ok(count) => {
                            partition_counts.insert(message.topic.clone(), count);
                            count
                        }
                        Err(e) => {
                            let topic = message.topic.clone();
                            pending.push_front(message);
                            error!(
                                "Failed to assign partitions to {} messages, metadata for '{}' unavailable: {}",
                                pending.len(),
                                topic,
                                e
                            );
                            cluster.mark_as_stale();
                            return AssignmentOutcome::MetadataStale {
                                assigned,
                                remaining: pending.len(),
                                topic,
                                error: e,
                            };
                        }
                    },
                };
                partitioner.partition(count, &message)
            }
        };

        let topic_partition = TopicPartition::new(message.topic.clone(), partition);
        buffer.write(topic_partition, message);
        assigned += 1;
    }

    if assigned > 0 {
        debug!("Assigned partitions to {} messages", assigned);
    }
    AssignmentOutcome::Complete { assigned }
}

async fn partition_count(cluster: &dyn Cluster, topic: &str) -> Result<u32, ClusterError> {
    let partitions = cluster.partitions_for(topic).await?;
    if partitions.is_empty() {
        return Err(ClusterError::Metadata(format!(
            "topic '{}' reports no partitions",
            topic
        )));
    }
    Ok(partitions.len() as u32)
}
