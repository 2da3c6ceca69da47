//! Bloom filters over the identifiers a bundle uses from a package.
//!
//! A package reference carries an encoded filter so cross-repository search
//! can discard bundles that certainly do not use an identifier. A positive
//! test only means "maybe": callers confirm against the real index. Every
//! word passed to [`create_filter`] tests positive after [`decode`].
//!
//! ## Example
//!
//! ```
//! let encoded = codeintel_bloom::create_filter(&["ident A", "ident B"]).unwrap();
//! let test = codeintel_bloom::decode(&encoded).unwrap();
//! assert!(test("ident A"));
//! ```

pub mod error;
pub mod filter;
mod hash;

use std::collections::BTreeSet;

use tracing::debug;

pub use error::BloomFilterError;
pub use filter::{
    choose_size, estimated_false_positive_rate, BloomFilter, FILTER_SIZES, NUM_HASH_FUNCTIONS,
    TARGET_FALSE_POSITIVE_RATE,
};

/// Build and encode a filter containing every word in `words`.
///
/// The filter is sized for the number of distinct words so that the estimated
/// false positive rate stays under [`TARGET_FALSE_POSITIVE_RATE`].
pub fn create_filter<S: AsRef<str>>(words: &[S]) -> Result<Vec<u8>, BloomFilterError> {
    let unique: BTreeSet<&str> = words.iter().map(|w| w.as_ref()).collect();
    let num_bits = choose_size(unique.len());

    let mut filter = BloomFilter::new(num_bits, NUM_HASH_FUNCTIONS)?;
    for word in &unique {
        filter.insert(word);
    }

    debug!(
        words = unique.len(),
        bits = num_bits,
        "Created bloom filter"
    );
    filter.encode()
}

/// Decode an encoded filter into a membership test.
pub fn decode(bytes: &[u8]) -> Result<impl Fn(&str) -> bool, BloomFilterError> {
    let filter = BloomFilter::from_bytes(bytes)?;
    Ok(move |word: &str| filter.test(word))
}

/// Merge two encoded filters so that every member of either tests positive.
pub fn merge(left: &[u8], right: &[u8]) -> Result<Vec<u8>, BloomFilterError> {
    let left = BloomFilter::from_bytes(left)?;
    let right = BloomFilter::from_bytes(right)?;
    left.union(&right)?.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_decode() {
        let encoded = create_filter(&["foo", "bar", "baz"]).unwrap();
        let test = decode(&encoded).unwrap();
        assert!(test("foo"));
        assert!(test("bar"));
        assert!(test("baz"));
        assert!(!test("qux"));
    }

    #[test]
    fn test_create_empty_filter() {
        let words: [&str; 0] = [];
        let test = decode(&create_filter(&words).unwrap()).unwrap();
        assert!(!test("foo"));
    }

    #[test]
    fn test_duplicates_do_not_grow_filter() {
        let words = vec!["same"; 50_000];
        let filter = BloomFilter::from_bytes(&create_filter(&words).unwrap()).unwrap();
        assert_eq!(filter.num_bits(), FILTER_SIZES[0]);
    }

    #[test]
    fn test_merge() {
        let left = create_filter(&["left"]).unwrap();
        let many: Vec<String> = (0..5_000).map(|i| format!("right{}", i)).collect();
        let right = create_filter(&many).unwrap();

        let test = decode(&merge(&left, &right).unwrap()).unwrap();
        assert!(test("left"));
        for word in &many {
            assert!(test(word));
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode(&[1, 2, 3]).is_err());
    }
}
