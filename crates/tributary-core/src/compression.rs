//! Compression codecs for producer batches
//!
//! A producer compresses each partition batch as a unit before it goes on
//! the wire. The codec is chosen once, by name, when the producer is
//! configured:
//!
//! | Name     | Codec    | Notes                                  |
//! |----------|----------|----------------------------------------|
//! | (none)   | `None`   | Passthrough                            |
//! | `gzip`   | `Gzip`   | Best ratio of the classic codecs       |
//! | `snappy` | `Snappy` | Kafka default for many deployments     |
//! | `lz4`    | `Lz4`    | Lowest latency, size-prefixed blocks   |
//! | `zstd`   | `Zstd`   | High ratio at moderate CPU cost        |
//!
//! # Example
//!
//! ```rust
//! use tributary_core::compression::{find_codec, CompressionCodec};
//!
//! let codec = find_codec(Some("lz4")).unwrap();
//! assert_eq!(codec, CompressionCodec::Lz4);
//!
//! let data = b"hello hello hello hello".repeat(10);
//! let compressed = codec.compress(&data).unwrap();
//! assert_eq!(&codec.decompress(&compressed).unwrap()[..], &data[..]);
//! ```

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

/// Upper bound for a single decompressed zstd batch
const ZSTD_MAX_DECOMPRESSED: usize = 64 * 1024 * 1024;

/// Zstd level used for producer batches
const ZSTD_LEVEL: i32 = 3;

// ============================================================================
// Error Types
// ============================================================================

/// Compression-related errors
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Unknown compression codec: {0}")]
    UnknownCodec(String),

    #[error("LZ4 compression failed: {0}")]
    Lz4Error(String),

    #[error("Zstd compression failed: {0}")]
    ZstdError(String),

    #[error("Snappy compression failed: {0}")]
    SnappyError(String),

    #[error("Gzip compression failed: {0}")]
    GzipError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CompressionError>;

// ============================================================================
// Codec
// ============================================================================

/// Compression codec applied to a partition batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionCodec {
    /// No compression (passthrough)
    #[default]
    None = 0,
    Gzip = 1,
    Snappy = 2,
    Lz4 = 3,
    Zstd = 4,
}

impl CompressionCodec {
    /// Get codec name as used in configuration
    pub fn name(&self) -> &'static str {
        match self {
            CompressionCodec::None => "none",
            CompressionCodec::Gzip => "gzip",
            CompressionCodec::Snappy => "snappy",
            CompressionCodec::Lz4 => "lz4",
            CompressionCodec::Zstd => "zstd",
        }
    }

    /// Whether this codec actually transforms the payload
    pub fn is_compressed(&self) -> bool {
        !matches!(self, CompressionCodec::None)
    }

    /// Compress a batch payload
    pub fn compress(&self, data: &[u8]) -> Result<Bytes> {
        let compressed = match self {
            CompressionCodec::None => return Ok(Bytes::copy_from_slice(data)),
            CompressionCodec::Gzip => compress_gzip(data)?,
            CompressionCodec::Snappy => compress_snappy(data)?,
            CompressionCodec::Lz4 => compress_lz4(data)?,
            CompressionCodec::Zstd => compress_zstd(data)?,
        };
        Ok(Bytes::from(compressed))
    }

    /// Decompress a payload produced by [`CompressionCodec::compress`]
    pub fn decompress(&self, data: &[u8]) -> Result<Bytes> {
        let decompressed = match self {
            CompressionCodec::None => return Ok(Bytes::copy_from_slice(data)),
            CompressionCodec::Gzip => decompress_gzip(data)?,
            CompressionCodec::Snappy => decompress_snappy(data)?,
            CompressionCodec::Lz4 => decompress_lz4(data)?,
            CompressionCodec::Zstd => decompress_zstd(data)?,
        };
        Ok(Bytes::from(decompressed))
    }
}

impl std::fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CompressionCodec {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(CompressionCodec::None),
            "gzip" => Ok(CompressionCodec::Gzip),
            "snappy" => Ok(CompressionCodec::Snappy),
            "lz4" => Ok(CompressionCodec::Lz4),
            "zstd" | "zstandard" => Ok(CompressionCodec::Zstd),
            other => Err(CompressionError::UnknownCodec(other.to_string())),
        }
    }
}

/// Resolve a codec by name.
///
/// `None` resolves to the passthrough codec so that "no compression
/// configured" and "compression = none" behave the same.
pub fn find_codec(name: Option<&str>) -> Result<CompressionCodec> {
    match name {
        None => Ok(CompressionCodec::None),
        Some(name) => name.parse(),
    }
}

// ============================================================================
// Codec Implementations
// ============================================================================

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CompressionError::GzipError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CompressionError::GzipError(e.to_string()))
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CompressionError::GzipError(e.to_string()))?;
    Ok(out)
}

fn compress_snappy(data: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(data)
        .map_err(|e| CompressionError::SnappyError(e.to_string()))
}

fn decompress_snappy(data: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|e| CompressionError::SnappyError(e.to_string()))
}

/// LZ4 block with the uncompressed size prepended, so decompression needs no
/// out-of-band length
fn compress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    lz4::block::compress(data, None, true).map_err(|e| CompressionError::Lz4Error(e.to_string()))
}

fn decompress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    lz4::block::decompress(data, None).map_err(|e| CompressionError::Lz4Error(e.to_string()))
}

fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::bulk::compress(data, ZSTD_LEVEL).map_err(|e| CompressionError::ZstdError(e.to_string()))
}

fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::bulk::decompress(data, ZSTD_MAX_DECOMPRESSED)
        .map_err(|e| CompressionError::ZstdError(e.to_string()))
}
