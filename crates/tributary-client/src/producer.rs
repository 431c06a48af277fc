//! Buffered producer with synchronous delivery and retries
//!
//! `produce()` only queues a message; nothing touches the network until
//! `deliver_messages()` is called. Delivery assigns partitions, sends one
//! request per leader broker, and retries whatever is left until either
//! everything is acknowledged or `max_retries` is exhausted.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tributary_client::memory::InMemoryCluster;
//! use tributary_client::{Producer, ProducerConfig, ProducerRecord};
//!
//! # async fn example() -> tributary_client::Result<()> {
//! let cluster = Arc::new(InMemoryCluster::new(3).with_topic("events", 6));
//! let mut producer = Producer::new(ProducerConfig::default(), cluster)?;
//!
//! producer.produce(ProducerRecord::new("events", "hello").key("user-1"))?;
//! producer.produce(ProducerRecord::new("events", "world").key("user-2"))?;
//!
//! let report = producer.deliver_messages().await?;
//! assert_eq!(report.delivered_message_count, 2);
//! # Ok(())
//! # }
//! ```

use crate::assignment::{assign_partitions, AssignmentOutcome};
use crate::buffer::MessageBuffer;
use crate::cluster::Cluster;
use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use crate::instrumentation::{DeliveryEvent, Instrumenter, TracingInstrumenter};
use crate::message::{PendingMessage, ProducerRecord};
use crate::operation::{DeliveryOperation, DeliverySettings};
use crate::partitioner::{DefaultPartitioner, Partitioner};
use crate::pending::PendingMessageQueue;
use crate::protocol::RequiredAcks;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tributary_core::compression::CompressionCodec;

/// Outcome of a successful `deliver_messages()` call
pub type DeliveryReport = DeliveryEvent;

// ============================================================================
// Producer
// ============================================================================

/// Buffers messages and delivers them to partition leaders on demand
pub struct Producer {
    config: ProducerConfig,
    codec: CompressionCodec,
    cluster: Arc<dyn Cluster>,
    partitioner: Arc<dyn Partitioner>,
    instrumenter: Arc<dyn Instrumenter>,
    /// Messages without a partition yet
    pending: PendingMessageQueue,
    /// Messages assigned to a partition, awaiting acknowledgment
    buffer: MessageBuffer,
    stats: ProducerStats,
    shutdown: bool,
}

impl Producer {
    /// Create a producer, validating the configuration
    pub fn new(config: ProducerConfig, cluster: Arc<dyn Cluster>) -> Result<Self> {
        config.validate()?;
        let codec = config.codec()?;

        Ok(Self {
            config,
            codec,
            cluster,
            partitioner: Arc::new(DefaultPartitioner),
            instrumenter: Arc::new(TracingInstrumenter),
            pending: PendingMessageQueue::new(),
            buffer: MessageBuffer::new(),
            stats: ProducerStats::default(),
            shutdown: false,
        })
    }

    /// Replace the default murmur2 partitioner
    pub fn with_partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Arc::new(partitioner);
        self
    }

    /// Replace the default tracing instrumenter
    pub fn with_instrumenter(mut self, instrumenter: Arc<dyn Instrumenter>) -> Self {
        self.instrumenter = instrumenter;
        self
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Queue a message for the next `deliver_messages()` call.
    ///
    /// Fails with [`Error::BufferOverflow`] if either buffer ceiling would be
    /// crossed. The message is not queued in that case.
    pub fn produce(&mut self, record: ProducerRecord) -> Result<()> {
        self.ensure_open()?;
        let message = PendingMessage::from_record(record);

        if self.buffer_size() >= self.config.max_buffer_size {
            return Err(Error::BufferOverflow(format!(
                "Cannot produce to {}, max buffer size ({} messages) reached",
                message.topic, self.config.max_buffer_size
            )));
        }

        if self.buffer_bytesize() + message.bytesize() > self.config.max_buffer_bytesize {
            return Err(Error::BufferOverflow(format!(
                "Cannot produce to {}, max buffer bytesize ({} bytes) reached",
                message.topic, self.config.max_buffer_bytesize
            )));
        }

        self.cluster
            .add_target_topics(BTreeSet::from([message.topic.clone()]));
        self.pending.push(message);
        self.stats.messages_produced += 1;
        Ok(())
    }

    /// Deliver every queued and buffered message.
    ///
    /// Returns once all messages are acknowledged, or fails with
    /// [`Error::DeliveryFailed`] after `max_retries` retries. Undelivered
    /// messages stay buffered for a later call.
    pub async fn deliver_messages(&mut self) -> Result<DeliveryReport> {
        self.ensure_open()?;

        let message_count = self.buffer_size();
        if message_count == 0 {
            return Ok(DeliveryReport::default());
        }

        let topics: BTreeSet<String> = self
            .pending
            .topics()
            .chain(self.buffer.topics())
            .map(str::to_string)
            .collect();
        self.cluster.add_target_topics(topics);

        let operation = DeliveryOperation::new(
            self.cluster.clone(),
            self.instrumenter.clone(),
            self.delivery_settings(),
        );

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            debug!(
                "Delivery attempt {}: {} pending, {} buffered",
                attempt,
                self.pending.len(),
                self.buffer.size()
            );

            self.attempt_delivery(&operation).await;

            if self.pending.is_empty() && self.buffer.is_empty() {
                break;
            }

            if attempt <= self.config.max_retries {
                warn!(
                    "Failed to send all messages; attempting retry {} of {} after {:?}",
                    attempt, self.config.max_retries, self.config.retry_backoff
                );
                self.stats.retries += 1;
                tokio::time::sleep(self.config.retry_backoff).await;
            } else {
                error!("Failed to send all messages; keeping remaining messages in buffer");
                break;
            }
        }

        if self.config.required_acks == RequiredAcks::None {
            // Nothing to wait for, anything still buffered is dropped
            self.buffer.clear();
        }

        let event = DeliveryEvent {
            message_count,
            attempts: attempt,
            delivered_message_count: message_count.saturating_sub(self.buffer_size()),
        };
        self.instrumenter.deliver_messages(&event);

        if !self.pending.is_empty() {
            // Some topics never resolved; make sure the next call refreshes
            self.cluster.mark_as_stale();
        }

        if !self.pending.is_empty() || !self.buffer.is_empty() {
            self.stats.failed_deliveries += 1;
            return Err(Error::DeliveryFailed {
                partitions: self.buffer.partitions().cloned().collect(),
                unassigned: self.pending.len(),
                attempts: attempt,
            });
        }

        Ok(event)
    }

    /// One pass: refresh, assign, send
    async fn attempt_delivery(&mut self, operation: &DeliveryOperation) {
        if let Err(e) = self.cluster.refresh_metadata_if_necessary().await {
            error!("Failed to refresh cluster metadata: {}", e);
            self.cluster.mark_as_stale();
            return;
        }

        let outcome = assign_partitions(
            &mut self.pending,
            &mut self.buffer,
            self.cluster.as_ref(),
            self.partitioner.as_ref(),
        )
        .await;
        if let AssignmentOutcome::MetadataStale { topic, error, .. } = &outcome {
            self.instrumenter.topic_error(topic, error);
        }

        if self.buffer.is_empty() {
            return;
        }

        let summary = operation.execute(&mut self.buffer).await;
        self.stats.batches_sent += summary.requests_sent() as u64;
        self.stats.messages_delivered += summary.acked_messages() as u64;
    }

    fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            required_acks: self.config.required_acks,
            ack_timeout: self.config.ack_timeout,
            request_timeout: self.config.request_timeout,
            codec: self.codec,
            compression_threshold: self.config.compression_threshold,
        }
    }

    /// Pending plus buffered messages
    pub fn buffer_size(&self) -> usize {
        self.pending.len() + self.buffer.size()
    }

    /// Pending plus buffered value and key bytes
    pub fn buffer_bytesize(&self) -> usize {
        self.pending.bytesize() + self.buffer.bytesize()
    }

    /// Drop every pending and buffered message
    pub fn clear_buffer(&mut self) {
        let dropped = self.buffer_size();
        self.pending.clear();
        self.buffer.clear();
        if dropped > 0 {
            warn!("Cleared {} undelivered messages from the buffer", dropped);
        }
    }

    /// Release cluster connections. Later calls fail with [`Error::Shutdown`].
    pub async fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        let remaining = self.buffer_size();
        if remaining > 0 {
            warn!("Shutting down producer with {} undelivered messages", remaining);
        }
        self.cluster.disconnect().await;
        self.shutdown = true;
        info!("Producer shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Get producer statistics
    pub fn stats(&self) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            messages_produced: self.stats.messages_produced,
            messages_delivered: self.stats.messages_delivered,
            batches_sent: self.stats.batches_sent,
            failed_deliveries: self.stats.failed_deliveries,
            retries: self.stats.retries,
            buffered: self.buffer_size() as u64,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutdown {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct ProducerStats {
    messages_produced: u64,
    messages_delivered: u64,
    batches_sent: u64,
    failed_deliveries: u64,
    retries: u64,
}

/// Producer statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerStatsSnapshot {
    /// Messages accepted by `produce()`
    pub messages_produced: u64,
    /// Messages acknowledged by a broker
    pub messages_delivered: u64,
    /// Produce requests issued
    pub batches_sent: u64,
    /// `deliver_messages()` calls that ended in `DeliveryFailed`
    pub failed_deliveries: u64,
    /// Retry rounds after a first attempt
    pub retries: u64,
    /// Messages pending or buffered right now
    pub buffered: u64,
}

impl ProducerStatsSnapshot {
    /// Calculate success rate
    pub fn success_rate(&self) -> f64 {
        if self.messages_produced == 0 {
            1.0
        } else {
            self.messages_delivered as f64 / self.messages_produced as f64
        }
    }
}
