//! Bloom filter bit set and its wire encoding.
//!
//! Encoded form: gzip-compressed JSON `{"numHashFunctions": k, "buckets": [..]}`
//! where `buckets` holds the bit set as 32-bit words.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::BloomFilterError;
use crate::hash::locations;

/// Number of hash functions used by every filter this crate creates.
pub const NUM_HASH_FUNCTIONS: u32 = 16;

/// Acceptable false positive rate when sizing a new filter.
pub const TARGET_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Candidate filter sizes in bits, smallest first.
pub const FILTER_SIZES: [u64; 10] = [
    1 << 13,
    1 << 14,
    1 << 15,
    1 << 16,
    1 << 17,
    1 << 18,
    1 << 19,
    1 << 20,
    1 << 21,
    1 << 22,
];

/// Estimated false positive rate of a filter with `num_bits` bits and
/// `num_hash_functions` hashes holding `num_words` words.
pub fn estimated_false_positive_rate(num_bits: u64, num_hash_functions: u32, num_words: usize) -> f64 {
    let k = f64::from(num_hash_functions);
    let fill = 1.0 - (-k * num_words as f64 / num_bits as f64).exp();
    fill.powf(k)
}

/// Smallest candidate size meeting the target rate for `num_words` words.
pub fn choose_size(num_words: usize) -> u64 {
    FILTER_SIZES
        .iter()
        .copied()
        .find(|&bits| {
            estimated_false_positive_rate(bits, NUM_HASH_FUNCTIONS, num_words)
                <= TARGET_FALSE_POSITIVE_RATE
        })
        .unwrap_or(FILTER_SIZES[FILTER_SIZES.len() - 1])
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodedFilter {
    num_hash_functions: u32,
    buckets: Vec<u32>,
}

/// In-memory bloom filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    num_hash_functions: u32,
    buckets: Vec<u32>,
}

impl BloomFilter {
    /// Create an empty filter. `num_bits` must be a power of two and at least 32.
    pub fn new(num_bits: u64, num_hash_functions: u32) -> Result<Self, BloomFilterError> {
        if num_bits < 32 || !num_bits.is_power_of_two() {
            return Err(BloomFilterError::Invalid(format!(
                "filter size must be a power of two >= 32, got {}",
                num_bits
            )));
        }
        if num_hash_functions == 0 {
            return Err(BloomFilterError::Invalid(
                "filter needs at least one hash function".to_string(),
            ));
        }

        Ok(Self {
            num_hash_functions,
            buckets: vec![0; (num_bits / 32) as usize],
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.buckets.len() as u64 * 32
    }

    pub fn num_hash_functions(&self) -> u32 {
        self.num_hash_functions
    }

    pub fn insert(&mut self, word: &str) {
        for location in locations(word, self.num_hash_functions, self.num_bits()) {
            self.buckets[(location / 32) as usize] |= 1 << (location % 32);
        }
    }

    /// Test membership. False positives are possible, false negatives are not.
    pub fn test(&self, word: &str) -> bool {
        locations(word, self.num_hash_functions, self.num_bits())
            .into_iter()
            .all(|location| self.buckets[(location / 32) as usize] & (1 << (location % 32)) != 0)
    }

    /// Reduce the filter to `num_bits` bits by OR-ing its upper halves onto
    /// the lower ones. Every word present before folding tests positive after.
    pub fn fold_to(&self, num_bits: u64) -> Result<Self, BloomFilterError> {
        if num_bits > self.num_bits() || num_bits < 32 || !num_bits.is_power_of_two() {
            return Err(BloomFilterError::Invalid(format!(
                "cannot fold a {}-bit filter to {} bits",
                self.num_bits(),
                num_bits
            )));
        }

        let words = (num_bits / 32) as usize;
        let mut buckets = vec![0u32; words];
        for (i, bucket) in self.buckets.iter().enumerate() {
            buckets[i % words] |= bucket;
        }

        Ok(Self {
            num_hash_functions: self.num_hash_functions,
            buckets,
        })
    }

    /// Union of two filters with the same hash count, at the smaller size.
    pub fn union(&self, other: &BloomFilter) -> Result<Self, BloomFilterError> {
        if self.num_hash_functions != other.num_hash_functions {
            return Err(BloomFilterError::Invalid(format!(
                "hash function counts differ ({} vs {})",
                self.num_hash_functions, other.num_hash_functions
            )));
        }

        let num_bits = self.num_bits().min(other.num_bits());
        let mut merged = self.fold_to(num_bits)?;
        let folded = other.fold_to(num_bits)?;
        for (bucket, other) in merged.buckets.iter_mut().zip(folded.buckets) {
            *bucket |= other;
        }
        Ok(merged)
    }

    /// Encode as gzip-compressed JSON.
    pub fn encode(&self) -> Result<Vec<u8>, BloomFilterError> {
        let payload = serde_json::to_vec(&EncodedFilter {
            num_hash_functions: self.num_hash_functions,
            buckets: self.buckets.clone(),
        })?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        Ok(encoder.finish()?)
    }

    /// Decode a filter produced by [`BloomFilter::encode`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BloomFilterError> {
        let mut payload = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut payload)?;

        let encoded: EncodedFilter = serde_json::from_slice(&payload)?;
        let mut filter = Self::new(encoded.buckets.len() as u64 * 32, encoded.num_hash_functions)?;
        filter.buckets = encoded.buckets;
        Ok(filter)
    }
}
