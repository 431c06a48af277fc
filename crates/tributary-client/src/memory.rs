//! In-memory cluster for tests and local development
//!
//! [`InMemoryCluster`] implements the [`Cluster`] contract over a fixed set
//! of [`InMemoryBroker`]s. The leader of partition `p` is broker
//! `p % broker_count`. Failures can be scripted per topic, partition or
//! broker, and every appended message is kept so tests can inspect exactly
//! what each partition received and in which order.
//!
//! ```rust
//! use tributary_client::memory::InMemoryCluster;
//! use tributary_client::protocol::PartitionErrorCode;
//! use tributary_client::TopicPartition;
//!
//! let cluster = InMemoryCluster::new(3).with_topic("orders", 6);
//! // The next two produce attempts for orders/4 are rejected
//! cluster.fail_partition(&TopicPartition::new("orders", 4), PartitionErrorCode::NotLeaderForPartition, 2);
//! assert_eq!(cluster.leader_id("orders", 4), 1);
//! ```

use crate::cluster::{Broker, BrokerId, Cluster, ClusterError, PartitionInfo};
use crate::message::{BufferedMessage, TopicPartition};
use crate::protocol::{
    PartitionErrorCode, PartitionResponse, ProduceRequest, ProduceResponse,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Cluster
// ============================================================================

#[derive(Default)]
struct ClusterState {
    topics: BTreeMap<String, u32>,
    target_topics: BTreeSet<String>,
    stale: bool,
    refreshes: usize,
    stale_marks: usize,
    refresh_failures: usize,
    metadata_failures: HashMap<String, usize>,
    leader_failures: HashMap<TopicPartition, usize>,
    disconnected: bool,
}

/// A cluster of in-memory brokers
pub struct InMemoryCluster {
    brokers: Vec<Arc<InMemoryBroker>>,
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    /// Create a cluster with `broker_count` brokers (at least one)
    pub fn new(broker_count: u32) -> Self {
        let brokers = (0..broker_count.max(1))
            .map(|id| Arc::new(InMemoryBroker::new(id)))
            .collect();
        Self {
            brokers,
            state: Mutex::new(ClusterState::default()),
        }
    }

    /// Add a topic while building the cluster
    pub fn with_topic(self, topic: impl Into<String>, partitions: u32) -> Self {
        self.create_topic(topic, partitions);
        self
    }

    /// Create or resize a topic
    pub fn create_topic(&self, topic: impl Into<String>, partitions: u32) {
        self.state.lock().topics.insert(topic.into(), partitions);
    }

    pub fn broker(&self, id: BrokerId) -> Option<Arc<InMemoryBroker>> {
        self.brokers.get(id as usize).cloned()
    }

    pub fn broker_count(&self) -> u32 {
        self.brokers.len() as u32
    }

    /// Broker leading a partition
    pub fn leader_id(&self, _topic: &str, partition: u32) -> BrokerId {
        partition % self.broker_count()
    }

    fn leader(&self, partition: u32) -> &Arc<InMemoryBroker> {
        &self.brokers[(partition % self.broker_count()) as usize]
    }

    /// Fail the next `times` partition-count lookups for a topic
    pub fn fail_metadata(&self, topic: impl Into<String>, times: usize) {
        self.state
            .lock()
            .metadata_failures
            .insert(topic.into(), times);
    }

    /// Fail the next `times` metadata refreshes
    pub fn fail_refresh(&self, times: usize) {
        self.state.lock().refresh_failures = times;
    }

    /// Fail the next `times` leader lookups for a partition
    pub fn fail_leader_lookup(&self, topic_partition: &TopicPartition, times: usize) {
        self.state
            .lock()
            .leader_failures
            .insert(topic_partition.clone(), times);
    }

    /// Have the partition's leader reject the next `times` batches with `error`
    pub fn fail_partition(
        &self,
        topic_partition: &TopicPartition,
        error: PartitionErrorCode,
        times: usize,
    ) {
        self.leader(topic_partition.partition)
            .fail_partition(topic_partition, error, times);
    }

    /// Messages appended to a partition, in log order
    pub fn messages(&self, topic_partition: &TopicPartition) -> Vec<BufferedMessage> {
        self.leader(topic_partition.partition)
            .messages(topic_partition)
    }

    /// Message values appended to a partition, in log order
    pub fn values(&self, topic_partition: &TopicPartition) -> Vec<String> {
        self.messages(topic_partition)
            .iter()
            .map(|m| String::from_utf8_lossy(&m.value).into_owned())
            .collect()
    }

    /// Total messages appended across all brokers
    pub fn total_messages(&self) -> usize {
        self.brokers.iter().map(|b| b.total_messages()).sum()
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    /// Completed metadata refreshes
    pub fn refresh_count(&self) -> usize {
        self.state.lock().refreshes
    }

    /// Times the cluster was marked stale
    pub fn stale_marks(&self) -> usize {
        self.state.lock().stale_marks
    }

    pub fn target_topics(&self) -> BTreeSet<String> {
        self.state.lock().target_topics.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.lock().disconnected
    }

    fn ensure_connected(state: &ClusterState) -> Result<(), ClusterError> {
        if state.disconnected {
            Err(ClusterError::Disconnected)
        } else {
            Ok(())
        }
    }
}

/// Take one scripted failure from a counter, removing it once exhausted
fn take_failure<K>(failures: &mut HashMap<K, usize>, key: &K) -> bool
where
    K: std::hash::Hash + Eq,
{
    match failures.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl Cluster for InMemoryCluster {
    fn add_target_topics(&self, topics: BTreeSet<String>) {
        self.state.lock().target_topics.extend(topics);
    }

    async fn refresh_metadata_if_necessary(&self) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        Self::ensure_connected(&state)?;
        if !state.stale {
            return Ok(());
        }
        if state.refresh_failures > 0 {
            state.refresh_failures -= 1;
            return Err(ClusterError::Metadata("metadata refresh failed".to_string()));
        }
        state.stale = false;
        state.refreshes += 1;
        debug!("Refreshed metadata for {} topics", state.target_topics.len());
        Ok(())
    }

    async fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionInfo>, ClusterError> {
        let mut state = self.state.lock();
        Self::ensure_connected(&state)?;
        if take_failure(&mut state.metadata_failures, &topic.to_string()) {
            return Err(ClusterError::Metadata(format!(
                "metadata lookup for '{}' failed",
                topic
            )));
        }

        let count = *state
            .topics
            .get(topic)
            .ok_or_else(|| ClusterError::TopicNotFound(topic.to_string()))?;
        let brokers = self.broker_count();
        Ok((0..count)
            .map(|partition| {
                let leader = partition % brokers;
                PartitionInfo {
                    partition,
                    leader: Some(leader),
                    replicas: vec![leader],
                    isr: vec![leader],
                }
            })
            .collect())
    }

    async fn leader_for(
        &self,
        topic: &str,
        partition: u32,
    ) -> Result<Arc<dyn Broker>, ClusterError> {
        let mut state = self.state.lock();
        Self::ensure_connected(&state)?;

        let topic_partition = TopicPartition::new(topic, partition);
        if take_failure(&mut state.leader_failures, &topic_partition) {
            return Err(ClusterError::LeaderNotAvailable {
                topic: topic.to_string(),
                partition,
            });
        }

        let count = *state
            .topics
            .get(topic)
            .ok_or_else(|| ClusterError::TopicNotFound(topic.to_string()))?;
        if partition >= count {
            return Err(ClusterError::LeaderNotAvailable {
                topic: topic.to_string(),
                partition,
            });
        }

        let broker: Arc<dyn Broker> = self.leader(partition).clone();
        Ok(broker)
    }

    fn mark_as_stale(&self) {
        let mut state = self.state.lock();
        state.stale = true;
        state.stale_marks += 1;
    }

    async fn disconnect(&self) {
        self.state.lock().disconnected = true;
        for broker in &self.brokers {
            broker.close();
        }
    }
}

// ============================================================================
// Broker
// ============================================================================

#[derive(Default)]
struct BrokerState {
    log: BTreeMap<TopicPartition, Vec<BufferedMessage>>,
    partition_errors: HashMap<TopicPartition, VecDeque<PartitionErrorCode>>,
    omitted: HashMap<TopicPartition, usize>,
    connection_failures: usize,
    latency: Option<Duration>,
    requests: Vec<ProduceRequest>,
    closed: bool,
}

/// A broker that appends produced messages to in-memory partition logs
pub struct InMemoryBroker {
    id: BrokerId,
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new(id: BrokerId) -> Self {
        Self {
            id,
            state: Mutex::new(BrokerState::default()),
        }
    }

    /// Reject the next `times` batches for a partition with `error`
    pub fn fail_partition(
        &self,
        topic_partition: &TopicPartition,
        error: PartitionErrorCode,
        times: usize,
    ) {
        let mut state = self.state.lock();
        let queue = state
            .partition_errors
            .entry(topic_partition.clone())
            .or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Drop the next `times` batches for a partition without mentioning them
    /// in the response
    pub fn omit_partition(&self, topic_partition: &TopicPartition, times: usize) {
        self.state
            .lock()
            .omitted
            .insert(topic_partition.clone(), times);
    }

    /// Fail the next `times` requests at the connection level
    pub fn fail_connection(&self, times: usize) {
        self.state.lock().connection_failures = times;
    }

    /// Delay every response
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    pub fn messages(&self, topic_partition: &TopicPartition) -> Vec<BufferedMessage> {
        self.state
            .lock()
            .log
            .get(topic_partition)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_messages(&self) -> usize {
        self.state.lock().log.values().map(Vec::len).sum()
    }

    /// Every request received, including failed ones
    pub fn requests(&self) -> Vec<ProduceRequest> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }

    fn append(&self, request: &ProduceRequest) -> ProduceResponse {
        let mut state = self.state.lock();
        let mut response = ProduceResponse::default();

        for batch in &request.batches {
            let topic_partition = batch.topic_partition();

            if take_failure(&mut state.omitted, &topic_partition) {
                continue;
            }

            let scripted = state
                .partition_errors
                .get_mut(&topic_partition)
                .and_then(VecDeque::pop_front);
            if let Some(error) = scripted {
                response
                    .partitions
                    .push(PartitionResponse::failed(&topic_partition, error));
                continue;
            }

            match batch.decode() {
                Ok(messages) => {
                    let log = state.log.entry(topic_partition.clone()).or_default();
                    let base_offset = log.len() as u64;
                    log.extend(messages);
                    response
                        .partitions
                        .push(PartitionResponse::ok(&topic_partition, base_offset));
                }
                Err(_) => {
                    response.partitions.push(PartitionResponse::failed(
                        &topic_partition,
                        PartitionErrorCode::CorruptMessage,
                    ));
                }
            }
        }

        response
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn id(&self) -> BrokerId {
        self.id
    }

    async fn produce(
        &self,
        request: ProduceRequest,
    ) -> Result<Option<ProduceResponse>, ClusterError> {
        let latency = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ClusterError::Disconnected);
            }
            state.requests.push(request.clone());
            if state.connection_failures > 0 {
                state.connection_failures -= 1;
                return Err(ClusterError::Connection {
                    broker: self.id,
                    reason: "connection reset by peer".to_string(),
                });
            }
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let response = self.append(&request);
        if request.required_acks.expects_response() {
            Ok(Some(response))
        } else {
            Ok(None)
        }
    }
}
