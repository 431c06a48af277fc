//! Tributary producer client
//!
//! Messages go through three stages:
//!
//! 1. `produce()` puts a message on the pending queue, subject to the
//!    configured buffer ceilings.
//! 2. `deliver_messages()` assigns each pending message a partition and moves
//!    it into the [`MessageBuffer`], grouped by (topic, partition).
//! 3. A [`DeliveryOperation`](operation::DeliveryOperation) round sends each
//!    partition group to its leader broker. Acknowledged groups leave the
//!    buffer; failed groups are retried in order until `max_retries` is
//!    exhausted.
//!
//! The broker side is abstracted behind the [`Cluster`] and [`Broker`]
//! traits. [`memory::InMemoryCluster`] implements both for tests and local
//! development.

pub mod assignment;
pub mod buffer;
pub mod cluster;
pub mod config;
pub mod error;
pub mod instrumentation;
pub mod memory;
pub mod message;
pub mod operation;
pub mod partitioner;
pub mod pending;
pub mod producer;
pub mod protocol;

pub use assignment::AssignmentOutcome;
pub use buffer::MessageBuffer;
pub use cluster::{Broker, BrokerId, Cluster, ClusterError, PartitionInfo};
pub use config::{ProducerConfig, ProducerConfigBuilder};
pub use error::{Error, Result};
pub use instrumentation::{DeliveryEvent, Instrumenter, TracingInstrumenter};
pub use message::{BufferedMessage, PendingMessage, ProducerRecord, TopicPartition};
pub use operation::{FailureReason, GroupState, RoundSummary};
pub use partitioner::{DefaultPartitioner, Partitioner};
pub use producer::{DeliveryReport, Producer, ProducerStatsSnapshot};
pub use protocol::RequiredAcks;

pub use tributary_core::compression::{find_codec, CompressionCodec};
