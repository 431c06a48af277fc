//! Producer configuration
//!
//! ```rust
//! use std::time::Duration;
//! use tributary_client::{ProducerConfig, RequiredAcks};
//!
//! let config = ProducerConfig::builder()
//!     .required_acks(RequiredAcks::All)
//!     .max_retries(5)
//!     .retry_backoff(Duration::from_millis(250))
//!     .max_buffer_size(10_000)
//!     .compression_codec("lz4")
//!     .build();
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{Error, Result};
use crate::protocol::RequiredAcks;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tributary_core::compression::{find_codec, CompressionCodec};

// ============================================================================
// Constants
// ============================================================================

/// Default maximum number of pending plus buffered messages
const DEFAULT_MAX_BUFFER_SIZE: usize = 1000;
/// Default maximum bytes of pending plus buffered messages
const DEFAULT_MAX_BUFFER_BYTESIZE: usize = 32 * 1024 * 1024;
/// Default broker-side acknowledgment timeout
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// Default client-side bound on a single produce request
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of retries after the first attempt
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default wait between attempts
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound on `max_retries`
pub const MAX_RETRIES_LIMIT: u32 = 10_000;

// ============================================================================
// Configuration
// ============================================================================

/// Producer configuration, fixed for the lifetime of a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Acknowledgments required from the broker
    pub required_acks: RequiredAcks,
    /// How long a broker may wait for replicas before answering
    pub ack_timeout: Duration,
    /// Client-side bound on one produce request, response included
    pub request_timeout: Duration,
    /// Retries after the first delivery attempt
    pub max_retries: u32,
    /// Wait between delivery attempts
    pub retry_backoff: Duration,
    /// Maximum pending plus buffered messages
    pub max_buffer_size: usize,
    /// Maximum pending plus buffered message bytes (values and keys)
    pub max_buffer_bytesize: usize,
    /// Codec name (`gzip`, `snappy`, `lz4`, `zstd`); `None` disables compression
    pub compression_codec: Option<String>,
    /// Minimum messages in a partition batch before the codec is applied
    pub compression_threshold: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            required_acks: RequiredAcks::Leader,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_buffer_bytesize: DEFAULT_MAX_BUFFER_BYTESIZE,
            compression_codec: None,
            compression_threshold: 1,
        }
    }
}

impl ProducerConfig {
    /// Create a new builder
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::default()
    }

    /// No acknowledgments, no retries: messages are presumed delivered once
    /// written to the socket
    pub fn fire_and_forget() -> Self {
        Self {
            required_acks: RequiredAcks::None,
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Wait for every in-sync replica and retry patiently
    pub fn durable() -> Self {
        Self {
            required_acks: RequiredAcks::All,
            max_retries: 10,
            retry_backoff: Duration::from_secs(1),
            ..Default::default()
        }
    }

    /// Resolve the configured codec name
    pub fn codec(&self) -> Result<CompressionCodec> {
        Ok(find_codec(self.compression_codec.as_deref())?)
    }

    /// Check value ranges and resolve the codec name
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_size == 0 {
            return Err(Error::ConfigError(
                "max_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.max_buffer_bytesize == 0 {
            return Err(Error::ConfigError(
                "max_buffer_bytesize must be greater than zero".to_string(),
            ));
        }
        if self.compression_threshold == 0 {
            return Err(Error::ConfigError(
                "compression_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(Error::ConfigError(format!(
                "max_retries must be at most {}",
                MAX_RETRIES_LIMIT
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::ConfigError(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        self.codec()
            .map_err(|e| Error::ConfigError(format!("compression_codec: {}", e)))?;
        Ok(())
    }
}

/// Builder for ProducerConfig
#[derive(Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    /// Set acknowledgments required
    pub fn required_acks(mut self, acks: RequiredAcks) -> Self {
        self.config.required_acks = acks;
        self
    }

    /// Set broker-side acknowledgment timeout
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Set client-side request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set number of retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set wait between attempts
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Set message count ceiling
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    /// Set byte ceiling
    pub fn max_buffer_bytesize(mut self, bytes: usize) -> Self {
        self.config.max_buffer_bytesize = bytes;
        self
    }

    /// Set compression codec by name
    pub fn compression_codec(mut self, name: impl Into<String>) -> Self {
        self.config.compression_codec = Some(name.into());
        self
    }

    /// Set minimum batch size for compression
    pub fn compression_threshold(mut self, threshold: usize) -> Self {
        self.config.compression_threshold = threshold;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ProducerConfig {
        self.config
    }
}
