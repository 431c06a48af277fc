//! Hash functions shared by producers and brokers.
//!
//! Key-to-partition mapping must agree on both sides of the wire, otherwise
//! keyed messages stop being co-located. Everything that maps a key to a
//! partition goes through [`murmur2_partition`].

const MURMUR2_SEED: u32 = 0x9747_b28c;
const MURMUR2_M: u32 = 0x5bd1_e995;
const MURMUR2_R: u32 = 24;

/// Kafka-compatible murmur2 hash.
///
/// Matches the Java client's `Utils.murmur2()`: same seed, same mixing
/// constants, 32-bit wrapping arithmetic, little-endian 4-byte blocks.
///
/// # Example
/// ```
/// # use tributary_core::hash::murmur2;
/// assert_eq!(murmur2(b"hello"), 1682149141);
/// ```
pub fn murmur2(data: &[u8]) -> u32 {
    let mut h = MURMUR2_SEED ^ (data.len() as u32);

    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k = k.wrapping_mul(MURMUR2_M);
        k ^= k >> MURMUR2_R;
        k = k.wrapping_mul(MURMUR2_M);
        h = h.wrapping_mul(MURMUR2_M) ^ k;
    }

    let tail = blocks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(MURMUR2_M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(MURMUR2_M);
    h ^= h >> 15;
    h
}

/// Map a key onto `[0, partition_count)`.
///
/// The sign bit is masked before the modulo, like Kafka's
/// `toPositive(murmur2(key)) % numPartitions`.
///
/// # Panics
///
/// Panics if `partition_count` is zero; callers resolve the partition count
/// first and treat zero as missing metadata.
#[inline]
pub fn murmur2_partition(key: &[u8], partition_count: u32) -> u32 {
    (murmur2(key) & 0x7fff_ffff) % partition_count
}

/// CRC32 (IEEE) checksum used to guard encoded partition batches.
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
