//! Storage layer for the code-intelligence worker.
//!
//! Provides RocksDB-backed storage with:
//! - An upload job queue with single-claimer dequeue and delayed retries,
//!   served from a state index rather than a scan of every row
//! - Bundle tables keyed by dump id, purged with range deletes
//! - Cross-repository package and package reference tables
//! - Scoped write transactions that commit through one `WriteBatch`
//! - Dirty-repository tokens for the commit graph updater

pub mod column_families;
pub mod db;
pub mod error;
pub mod index;
pub mod keys;
pub mod transaction;

pub use db::{DequeueOptions, Storage};
pub use error::StorageError;
pub use keys::{DumpKey, UploadKey};
pub use transaction::Transaction;
