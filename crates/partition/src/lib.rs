//! # Partition - Bucket Assignment
//!
//! Maps a record's 64-bit key to a bucket number.
//!
//! The key is encoded as 8 little-endian bytes, run through Adler-32, and the
//! checksum is reduced modulo the bucket count:
//!
//! ```text
//! bucket = adler32(key.to_le_bytes()) % num_buckets
//! ```
//!
//! This function is part of the on-disk format. The ingestion pipeline and
//! every tool that locates a single entity's bucket must compute it
//! identically, so it must never change for an existing store.
//!
//! ## Example
//!
//! ```rust
//! use partition::Partitioner;
//!
//! let p = Partitioner::new(4);
//! assert!(p.bucket_of(10) < 4);
//! assert_eq!(p.bucket_of(10), partition::bucket_of(10, 4));
//! ```

/// Largest prime below 2^16, the Adler-32 modulus.
const ADLER_MOD: u32 = 65521;

/// Largest block length for which the sums cannot overflow a `u32` before
/// reduction.
const ADLER_NMAX: usize = 5552;

/// Computes the Adler-32 checksum of `data` (RFC 1950).
#[must_use]
pub fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for block in data.chunks(ADLER_NMAX) {
        for &byte in block {
            a += u32::from(byte);
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }
    (b << 16) | a
}

/// Returns the bucket holding `key` in a store of `num_buckets` buckets.
///
/// # Panics
///
/// Panics if `num_buckets` is 0.
#[must_use]
pub fn bucket_of(key: u64, num_buckets: u32) -> u32 {
    assert!(num_buckets > 0, "num_buckets must be > 0");
    adler32(&key.to_le_bytes()) % num_buckets
}

/// A bucket assigner bound to a fixed bucket count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    num_buckets: u32,
}

impl Partitioner {
    /// # Panics
    ///
    /// Panics if `num_buckets` is 0.
    pub fn new(num_buckets: u32) -> Self {
        assert!(num_buckets > 0, "num_buckets must be > 0");
        Self { num_buckets }
    }

    #[must_use]
    pub fn num_buckets(&self) -> u32 {
        self.num_buckets
    }

    #[must_use]
    pub fn bucket_of(&self, key: u64) -> u32 {
        bucket_of(key, self.num_buckets)
    }
}
