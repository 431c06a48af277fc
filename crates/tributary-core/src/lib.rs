//! Primitives shared by Tributary clients and brokers: the key hash used for
//! partition selection and the batch compression codecs.

pub mod compression;
pub mod hash;

pub use compression::{find_codec, CompressionCodec, CompressionError};
pub use hash::{crc32, murmur2, murmur2_partition};
