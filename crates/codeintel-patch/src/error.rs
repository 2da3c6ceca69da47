//! Error types for bundle patching.

use codeintel_bloom::BloomFilterError;
use thiserror::Error;

/// Errors that can occur while merging a patch onto a base bundle
#[derive(Error, Debug)]
pub enum PatchError {
    /// A path reported as unchanged has a different range count on each side
    #[error(
        "Unchanged path {path} has {base_count} ranges in the base bundle but {patch_count} in the patch"
    )]
    UnequalUnmodifiedPaths {
        path: String,
        base_count: usize,
        patch_count: usize,
    },

    /// Package reference filters could not be merged
    #[error("Bloom filter error: {0}")]
    Bloom(#[from] BloomFilterError),
}
