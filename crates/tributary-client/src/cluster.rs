//! Collaborator contracts: cluster topology and broker connections
//!
//! The producer does not discover brokers, resolve leaders or manage
//! sockets. It talks to a [`Cluster`] for topology and to the [`Broker`]s
//! the cluster hands out for sending. Implementations are shared between
//! producers (`Arc<dyn Cluster>`) and must be internally synchronized.
//!
//! [`InMemoryCluster`](crate::memory::InMemoryCluster) implements both
//! traits without a network.

use crate::protocol::{ProduceRequest, ProduceResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Broker node identifier
pub type BrokerId = u32;

/// Errors reported by cluster and broker implementations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("leader not available for {topic}/{partition}")]
    LeaderNotAvailable { topic: String, partition: u32 },

    #[error("connection to broker {broker} failed: {reason}")]
    Connection { broker: BrokerId, reason: String },

    #[error("request to broker {0} timed out")]
    Timeout(BrokerId),

    #[error("cluster metadata unavailable: {0}")]
    Metadata(String),

    #[error("cluster connections are closed")]
    Disconnected,
}

/// Metadata for one partition of a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub partition: u32,
    /// Current leader, `None` while an election is in progress
    pub leader: Option<BrokerId>,
    pub replicas: Vec<BrokerId>,
    pub isr: Vec<BrokerId>,
}

/// Cluster topology and connection access
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Register topics so that metadata refreshes include them
    fn add_target_topics(&self, topics: BTreeSet<String>);

    /// Refresh metadata if it has been marked stale; no-op otherwise
    async fn refresh_metadata_if_necessary(&self) -> Result<(), ClusterError>;

    /// Partitions of a topic, from the current metadata view
    async fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionInfo>, ClusterError>;

    /// Connection to the broker currently leading a partition
    async fn leader_for(&self, topic: &str, partition: u32)
        -> Result<Arc<dyn Broker>, ClusterError>;

    /// Force a refresh before the next use of metadata
    fn mark_as_stale(&self);

    /// Close every broker connection
    async fn disconnect(&self);
}

/// A connection to one broker
#[async_trait]
pub trait Broker: Send + Sync {
    fn id(&self) -> BrokerId;

    /// Send a produce request.
    ///
    /// Returns `Ok(None)` when the request asks for no acknowledgments.
    async fn produce(&self, request: ProduceRequest)
        -> Result<Option<ProduceResponse>, ClusterError>;
}

impl std::fmt::Debug for dyn Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Broker({})", self.id())
    }
}
