//! One delivery attempt
//!
//! A [`DeliveryOperation`] takes whatever is in the buffer, finds the leader
//! of every partition, and sends one [`ProduceRequest`] per broker carrying
//! only that broker's partitions. Requests to different brokers run
//! concurrently. A partition is part of exactly one request per round, so no
//! two in-flight requests ever overlap for the same partition.
//!
//! Every partition ("group") moves through an explicit state machine:
//!
//! ```text
//! Pending ──► InFlight ──► Acked            (messages removed from buffer)
//!    │            └──────► Failed(reason)   (messages stay, retried in order)
//!    └───────────────────► Failed(reason)   (no leader / encoding failed)
//! ```
//!
//! A round can succeed partially: acknowledged groups leave the buffer,
//! failed ones stay exactly as they were.

use crate::buffer::MessageBuffer;
use crate::cluster::{Broker, BrokerId, Cluster, ClusterError};
use crate::instrumentation::Instrumenter;
use crate::message::TopicPartition;
use crate::protocol::{
    PartitionBatch, PartitionErrorCode, ProduceRequest, ProduceResponse, RequiredAcks,
};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use tributary_core::compression::CompressionCodec;

// ============================================================================
// Group State
// ============================================================================

/// Why a group was not acknowledged this round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The partition's leader could not be resolved
    LeaderUnavailable(ClusterError),
    /// The batch could not be encoded or compressed
    Encoding(String),
    /// The broker rejected the partition
    Partition(PartitionErrorCode),
    /// The request to the broker failed as a whole, timeouts included
    Transport(ClusterError),
    /// The broker answered but did not mention the partition
    MissingFromResponse,
}

/// State of one (topic, partition) group within a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupState {
    Pending,
    InFlight {
        broker: BrokerId,
        message_count: usize,
    },
    Acked {
        message_count: usize,
    },
    Failed(FailureReason),
}

/// Final group states of one round
#[derive(Debug, Clone, Default)]
pub struct RoundSummary {
    groups: BTreeMap<TopicPartition, GroupState>,
    requests_sent: usize,
}

impl RoundSummary {
    pub fn state(&self, topic_partition: &TopicPartition) -> Option<&GroupState> {
        self.groups.get(topic_partition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, &GroupState)> {
        self.groups.iter()
    }

    /// Groups acknowledged this round
    pub fn acked(&self) -> impl Iterator<Item = &TopicPartition> {
        self.groups
            .iter()
            .filter(|(_, state)| matches!(state, GroupState::Acked { .. }))
            .map(|(tp, _)| tp)
    }

    /// Groups that failed this round
    pub fn failed(&self) -> impl Iterator<Item = (&TopicPartition, &FailureReason)> {
        self.groups.iter().filter_map(|(tp, state)| match state {
            GroupState::Failed(reason) => Some((tp, reason)),
            _ => None,
        })
    }

    /// Messages removed from the buffer this round
    pub fn acked_messages(&self) -> usize {
        self.groups
            .values()
            .map(|state| match state {
                GroupState::Acked { message_count } => *message_count,
                _ => 0,
            })
            .sum()
    }

    /// Produce requests issued, one per broker contacted
    pub fn requests_sent(&self) -> usize {
        self.requests_sent
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn set(&mut self, topic_partition: TopicPartition, state: GroupState) {
        self.groups.insert(topic_partition, state);
    }

    fn fail(&mut self, topic_partition: &TopicPartition, reason: FailureReason) {
        if let Some(state) = self.groups.get_mut(topic_partition) {
            *state = GroupState::Failed(reason);
        }
    }

    /// InFlight → Acked, keeping the in-flight message count
    fn ack(&mut self, topic_partition: &TopicPartition) {
        if let Some(state) = self.groups.get_mut(topic_partition) {
            if let GroupState::InFlight { message_count, .. } = *state {
                *state = GroupState::Acked { message_count };
            }
        }
    }
}

// ============================================================================
// Delivery Operation
// ============================================================================

/// Send-side settings, derived from the producer configuration
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub required_acks: RequiredAcks,
    pub ack_timeout: Duration,
    pub request_timeout: Duration,
    pub codec: CompressionCodec,
    pub compression_threshold: usize,
}

/// Executes delivery rounds against a cluster
pub struct DeliveryOperation {
    cluster: Arc<dyn Cluster>,
    instrumenter: Arc<dyn Instrumenter>,
    settings: DeliverySettings,
}

struct BrokerRequest {
    broker: Arc<dyn Broker>,
    batches: Vec<PartitionBatch>,
}

impl DeliveryOperation {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        instrumenter: Arc<dyn Instrumenter>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            cluster,
            instrumenter,
            settings,
        }
    }

    /// Run one round over the buffer's current contents.
    ///
    /// Acknowledged messages are removed from `buffer`; everything else is
    /// left untouched for the next round.
    pub async fn execute(&self, buffer: &mut MessageBuffer) -> RoundSummary {
        let mut summary = RoundSummary::default();
        let requests = self.build_requests(buffer, &mut summary).await;
        summary.requests_sent = requests.len();

        let required_acks = self.settings.required_acks;
        let ack_timeout = self.settings.ack_timeout;
        let request_timeout = self.settings.request_timeout;

        let sends = requests.into_iter().map(|request| async move {
            let broker_id = request.broker.id();
            let partitions: Vec<TopicPartition> = request
                .batches
                .iter()
                .map(PartitionBatch::topic_partition)
                .collect();
            debug!(
                "Sending {} partition batches to broker {} (acks={})",
                partitions.len(),
                broker_id,
                required_acks.as_i16()
            );
            let produce = ProduceRequest {
                required_acks,
                timeout: ack_timeout,
                batches: request.batches,
            };
            let result =
                match tokio::time::timeout(request_timeout, request.broker.produce(produce)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            "Timed out after {:?} waiting for broker {}",
                            request_timeout, broker_id
                        );
                        Err(ClusterError::Timeout(broker_id))
                    }
                };
            (broker_id, partitions, result)
        });

        for (broker_id, partitions, result) in join_all(sends).await {
            match result {
                Err(e) => {
                    error!("Failed to send messages to broker {}: {}", broker_id, e);
                    self.cluster.mark_as_stale();
                    for tp in &partitions {
                        summary.fail(tp, FailureReason::Transport(e.clone()));
                    }
                }
                Ok(None) => {
                    // No acknowledgment requested: the write is presumed
                    // successful once the round is over
                    for tp in &partitions {
                        summary.ack(tp);
                    }
                }
                Ok(Some(response)) => {
                    self.handle_response(broker_id, &partitions, response, &mut summary);
                }
            }
        }

        for (tp, state) in summary.iter() {
            if let GroupState::Acked { message_count } = state {
                buffer.acknowledge(tp, *message_count);
            }
        }

        summary
    }

    /// Resolve leaders and encode one batch per partition, grouped by broker
    async fn build_requests(
        &self,
        buffer: &MessageBuffer,
        summary: &mut RoundSummary,
    ) -> Vec<BrokerRequest> {
        let mut requests: BTreeMap<BrokerId, BrokerRequest> = BTreeMap::new();

        for (tp, messages) in buffer.iter() {
            summary.set(tp.clone(), GroupState::Pending);

            let broker = match self.cluster.leader_for(&tp.topic, tp.partition).await {
                Ok(broker) => broker,
                Err(e) => {
                    error!("Could not connect to leader for partition {}: {}", tp, e);
                    self.instrumenter.topic_error(&tp.topic, &e);
                    self.cluster.mark_as_stale();
                    summary.fail(tp, FailureReason::LeaderUnavailable(e));
                    continue;
                }
            };

            let batch = match PartitionBatch::encode(
                tp,
                messages.iter(),
                self.settings.codec,
                self.settings.compression_threshold,
            ) {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to encode batch for {}: {}", tp, e);
                    summary.fail(tp, FailureReason::Encoding(e.to_string()));
                    continue;
                }
            };

            let broker_id = broker.id();
            summary.set(
                tp.clone(),
                GroupState::InFlight {
                    broker: broker_id,
                    message_count: batch.message_count,
                },
            );
            requests
                .entry(broker_id)
                .or_insert_with(|| BrokerRequest {
                    broker,
                    batches: Vec::new(),
                })
                .batches
                .push(batch);
        }

        requests.into_values().collect()
    }

    fn handle_response(
        &self,
        broker_id: BrokerId,
        partitions: &[TopicPartition],
        response: ProduceResponse,
        summary: &mut RoundSummary,
    ) {
        let mut answered: HashSet<TopicPartition> = HashSet::with_capacity(partitions.len());

        for partition_response in response.partitions {
            let tp = TopicPartition::new(partition_response.topic, partition_response.partition);
            if !partitions.contains(&tp) {
                warn!("Broker {} answered for unrequested partition {}", broker_id, tp);
                continue;
            }

            match partition_response.error {
                None => {
                    if let Some(GroupState::InFlight { message_count, .. }) = summary.state(&tp) {
                        debug!(
                            "Successfully appended {} messages to {} on broker {}",
                            message_count, tp, broker_id
                        );
                    }
                    summary.ack(&tp);
                }
                Some(code) => {
                    self.log_partition_error(broker_id, &tp, code);
                    if code.invalidates_metadata() {
                        self.cluster.mark_as_stale();
                    }
                    summary.fail(&tp, FailureReason::Partition(code));
                }
            }
            answered.insert(tp);
        }

        for tp in partitions.iter().filter(|tp| !answered.contains(*tp)) {
            warn!("Broker {} did not report a result for {}", broker_id, tp);
            summary.fail(tp, FailureReason::MissingFromResponse);
        }
    }

    fn log_partition_error(&self, broker_id: BrokerId, tp: &TopicPartition, code: PartitionErrorCode) {
        match code {
            PartitionErrorCode::CorruptMessage => {
                error!("Corrupt message when writing to {} on broker {}", tp, broker_id)
            }
            PartitionErrorCode::UnknownTopicOrPartition => {
                error!("Unknown topic or partition {} on broker {}", tp, broker_id)
            }
            PartitionErrorCode::LeaderNotAvailable => {
                error!("Leader currently not available for {}", tp)
            }
            PartitionErrorCode::NotLeaderForPartition => {
                warn!("Broker {} not currently leader for {}", broker_id, tp)
            }
            PartitionErrorCode::RequestTimedOut => {
                error!("Timed out while writing to {} on broker {}", tp, broker_id)
            }
            PartitionErrorCode::MessageSizeTooLarge => {
                error!("Message too large for {} on broker {}", tp, broker_id)
            }
            PartitionErrorCode::NotEnoughReplicas => {
                error!("Not enough in-sync replicas for {}", tp)
            }
            PartitionErrorCode::NotEnoughReplicasAfterAppend => {
                error!(
                    "Messages written, but to fewer in-sync replicas than required for {}",
                    tp
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::TracingInstrumenter;
    use crate::memory::InMemoryCluster;
    use crate::message::{PendingMessage, ProducerRecord};

    fn settings(required_acks: RequiredAcks) -> DeliverySettings {
        DeliverySettings {
            required_acks,
            ack_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            codec: CompressionCodec::None,
            compression_threshold: 1,
        }
    }

    fn operation(cluster: &Arc<InMemoryCluster>, acks: RequiredAcks) -> DeliveryOperation {
        DeliveryOperation::new(cluster.clone(), Arc::new(TracingInstrumenter), settings(acks))
    }

    fn write(buffer: &mut MessageBuffer, topic: &str, partition: u32, values: &[&'static str]) {
        for value in values {
            buffer.write(
                TopicPartition::new(topic, partition),
                PendingMessage::from_record(ProducerRecord::new(topic, *value)),
            );
        }
    }

    #[tokio::test]
    async fn test_all_groups_acked() {
        let cluster = Arc::new(InMemoryCluster::new(2).with_topic("t", 4));
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a", "b"]);
        write(&mut buffer, "t", 1, &["c"]);
        write(&mut buffer, "t", 2, &["d"]);

        let summary = operation(&cluster, RequiredAcks::Leader).execute(&mut buffer).await;

        assert!(buffer.is_empty());
        assert_eq!(summary.acked().count(), 3);
        assert_eq!(summary.acked_messages(), 4);
        assert_eq!(summary.failed().count(), 0);
        // Partitions 0 and 2 share broker 0, partition 1 is on broker 1
        assert_eq!(summary.requests_sent(), 2);
        assert_eq!(cluster.broker(0).unwrap().request_count(), 1);
        assert_eq!(cluster.values(&TopicPartition::new("t", 0)), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_partial_failure_leaves_failed_group() {
        let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 2));
        let failing = TopicPartition::new("t", 1);
        cluster.fail_partition(&failing, PartitionErrorCode::NotEnoughReplicas, 1);
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a"]);
        write(&mut buffer, "t", 1, &["b", "c"]);

        let summary = operation(&cluster, RequiredAcks::All).execute(&mut buffer).await;

        assert_eq!(
            summary.state(&TopicPartition::new("t", 0)),
            Some(&GroupState::Acked { message_count: 1 })
        );
        assert_eq!(
            summary.state(&failing),
            Some(&GroupState::Failed(FailureReason::Partition(
                PartitionErrorCode::NotEnoughReplicas
            )))
        );
        assert_eq!(buffer.size(), 2);
        assert!(buffer.messages_for(&TopicPartition::new("t", 0)).is_none());
        // Not a leadership problem, metadata stays fresh
        assert!(!cluster.is_stale());
    }

    #[tokio::test]
    async fn test_not_leader_marks_stale() {
        let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 1));
        let tp = TopicPartition::new("t", 0);
        cluster.fail_partition(&tp, PartitionErrorCode::NotLeaderForPartition, 1);
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a"]);

        operation(&cluster, RequiredAcks::Leader).execute(&mut buffer).await;

        assert!(cluster.is_stale());
        assert_eq!(buffer.size(), 1);
    }

    #[tokio::test]
    async fn test_leader_lookup_failure() {
        let cluster = Arc::new(InMemoryCluster::new(2).with_topic("t", 2));
        let tp = TopicPartition::new("t", 1);
        cluster.fail_leader_lookup(&tp, 1);
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a"]);
        write(&mut buffer, "t", 1, &["b"]);

        let summary = operation(&cluster, RequiredAcks::Leader).execute(&mut buffer).await;

        assert!(matches!(
            summary.state(&tp),
            Some(GroupState::Failed(FailureReason::LeaderUnavailable(_)))
        ));
        assert!(cluster.is_stale());
        assert_eq!(summary.requests_sent(), 1);
        assert_eq!(cluster.broker(1).unwrap().request_count(), 0);
        assert_eq!(buffer.size(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_fails_only_that_broker() {
        let cluster = Arc::new(InMemoryCluster::new(2).with_topic("t", 2));
        cluster.broker(1).unwrap().fail_connection(1);
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a"]);
        write(&mut buffer, "t", 1, &["b"]);

        let summary = operation(&cluster, RequiredAcks::Leader).execute(&mut buffer).await;

        assert!(matches!(
            summary.state(&TopicPartition::new("t", 1)),
            Some(GroupState::Failed(FailureReason::Transport(ClusterError::Connection { .. })))
        ));
        assert_eq!(summary.acked().count(), 1);
        assert!(cluster.is_stale());
    }

    #[tokio::test]
    async fn test_missing_partition_in_response() {
        let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 1));
        let tp = TopicPartition::new("t", 0);
        cluster.broker(0).unwrap().omit_partition(&tp, 1);
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a"]);

        let summary = operation(&cluster, RequiredAcks::Leader).execute(&mut buffer).await;

        assert_eq!(
            summary.state(&tp),
            Some(&GroupState::Failed(FailureReason::MissingFromResponse))
        );
        assert_eq!(buffer.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 1));
        cluster.broker(0).unwrap().set_latency(Duration::from_secs(60));
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a"]);

        let summary = operation(&cluster, RequiredAcks::Leader).execute(&mut buffer).await;

        assert_eq!(
            summary.state(&TopicPartition::new("t", 0)),
            Some(&GroupState::Failed(FailureReason::Transport(
                ClusterError::Timeout(0)
            )))
        );
        assert_eq!(buffer.size(), 1);
        assert!(cluster.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_brokers_are_sent_to_concurrently() {
        let cluster = Arc::new(InMemoryCluster::new(2).with_topic("t", 2));
        cluster.broker(0).unwrap().set_latency(Duration::from_secs(10));
        cluster.broker(1).unwrap().set_latency(Duration::from_secs(10));
        let mut settings = settings(RequiredAcks::Leader);
        settings.request_timeout = Duration::from_secs(30);
        let operation =
            DeliveryOperation::new(cluster.clone(), Arc::new(TracingInstrumenter), settings);
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a"]);
        write(&mut buffer, "t", 1, &["b"]);

        let started = tokio::time::Instant::now();
        let summary = operation.execute(&mut buffer).await;
        let elapsed = started.elapsed();

        assert_eq!(summary.requests_sent(), 2);
        assert_eq!(summary.acked().count(), 2);
        assert!(buffer.is_empty());
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(20), "sends ran one after another: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_no_acks_presumes_success() {
        let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 1));
        let tp = TopicPartition::new("t", 0);
        // The broker drops the batch, but without acks we cannot know
        cluster.fail_partition(&tp, PartitionErrorCode::RequestTimedOut, 1);
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["a"]);

        let summary = operation(&cluster, RequiredAcks::None).execute(&mut buffer).await;

        assert_eq!(summary.state(&tp), Some(&GroupState::Acked { message_count: 1 }));
        assert!(buffer.is_empty());
        assert!(cluster.values(&tp).is_empty());
    }

    #[tokio::test]
    async fn test_compressed_batches_decode_on_broker() {
        let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 1));
        let mut settings = settings(RequiredAcks::Leader);
        settings.codec = CompressionCodec::Lz4;
        let operation = DeliveryOperation::new(cluster.clone(), Arc::new(TracingInstrumenter), settings);
        let mut buffer = MessageBuffer::new();
        write(&mut buffer, "t", 0, &["x", "y", "z"]);

        operation.execute(&mut buffer).await;

        let requests = cluster.broker(0).unwrap().requests();
        assert_eq!(requests[0].batches[0].codec, CompressionCodec::Lz4);
        assert_eq!(cluster.values(&TopicPartition::new("t", 0)), vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_empty_buffer_sends_nothing() {
        let cluster = Arc::new(InMemoryCluster::new(1).with_topic("t", 1));
        let mut buffer = MessageBuffer::new();

        let summary = operation(&cluster, RequiredAcks::Leader).execute(&mut buffer).await;

        assert!(summary.is_empty());
        assert_eq!(summary.requests_sent(), 0);
        assert_eq!(cluster.broker(0).unwrap().request_count(), 0);
    }
}
