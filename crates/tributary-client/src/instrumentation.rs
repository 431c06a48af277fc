//! Producer notifications
//!
//! The producer reports what it did through an [`Instrumenter`]. The default
//! [`TracingInstrumenter`] turns notifications into `tracing` events; plug in
//! your own to feed a metrics system.

use crate::cluster::ClusterError;
use tracing::{info, warn};

/// Summary of one `deliver_messages()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryEvent {
    /// Pending plus buffered messages when the call started
    pub message_count: usize,
    /// Send rounds executed
    pub attempts: u32,
    /// `message_count` minus whatever was still pending or buffered at the end
    pub delivered_message_count: usize,
}

/// Receiver of producer notifications
pub trait Instrumenter: Send + Sync {
    /// Emitted once per `deliver_messages()` call that had work to do
    fn deliver_messages(&self, event: &DeliveryEvent);

    /// A topic could not be resolved or routed during a delivery round
    fn topic_error(&self, _topic: &str, _error: &ClusterError) {}
}

/// Logs notifications through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInstrumenter;

impl Instrumenter for TracingInstrumenter {
    fn deliver_messages(&self, event: &DeliveryEvent) {
        info!(
            message_count = event.message_count,
            attempts = event.attempts,
            delivered_message_count = event.delivered_message_count,
            "deliver_messages"
        );
    }

    fn topic_error(&self, topic: &str, error: &ClusterError) {
        warn!("Topic error for '{}': {}", topic, error);
    }
}
