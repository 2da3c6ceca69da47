//! # codeintel-patch
//!
//! Incremental re-indexing: merge a bundle correlated for a subset of files
//! onto the bundle stored for an earlier commit.
//!
//! [`patch_bundle`] runs in four passes over the two bundles:
//!
//! 1. Unify range identities of unchanged files (paired by span order)
//! 2. Prune result entries that point into modified or deleted files
//! 3. Merge definition and reference results of copied files, reusing the
//!    base's result ids when the definition lives in an unchanged file
//! 4. Copy rewritten documents into the base and drop deleted paths
//!
//! Moniker tables, packages and package references are merged alongside.
//! The merge is pure and in-memory; it either returns a complete bundle or
//! an error.

pub mod error;
mod merge;
mod tables;

pub use error::PatchError;
pub use merge::patch_bundle;
