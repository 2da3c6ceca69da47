//! Store capabilities used by the worker.
//!
//! [`Store`] covers the job queue and reads; [`StoreTransaction`] covers the
//! writes that must land together. Both are implemented for the RocksDB
//! store in `codeintel-storage` and by [`MockStore`] for tests.

mod mock;
mod rocks;

pub use mock::{MockStore, StoreCall};

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codeintel_storage::{DequeueOptions, StorageError};
use codeintel_types::{
    BundleData, DocumentData, Meta, MonikerLocations, Package, PackageReference, ResultChunkData,
    Upload,
};

/// Job queue and bundle reads.
#[async_trait]
pub trait Store: Send + Sync {
    /// Claim the next eligible upload, if any.
    async fn dequeue(&self, options: &DequeueOptions) -> Result<Option<Upload>, StorageError>;

    /// Return a claimed upload to the queue without counting an attempt.
    async fn requeue(&self, id: i64, process_after: DateTime<Utc>) -> Result<(), StorageError>;

    /// Record a failed attempt. Returns false if the upload was no longer
    /// being processed.
    async fn mark_errored(&self, id: i64, message: &str) -> Result<bool, StorageError>;

    /// Flag the repository for visibility recomputation. Idempotent.
    async fn mark_repository_as_dirty(&self, repository_id: i64) -> Result<(), StorageError>;

    async fn get_upload(&self, id: i64) -> Result<Option<Upload>, StorageError>;

    async fn read_bundle(&self, dump_id: i64) -> Result<Option<BundleData>, StorageError>;

    /// Begin a write transaction.
    async fn transact(&self) -> Result<Box<dyn StoreTransaction>, StorageError>;
}

/// Writes staged until [`StoreTransaction::commit`].
///
/// Bundle writes replace whatever was stored for the dump before.
#[async_trait]
pub trait StoreTransaction: Send {
    fn write_meta(&mut self, dump_id: i64, meta: &Meta) -> Result<(), StorageError>;

    fn write_documents(
        &mut self,
        dump_id: i64,
        documents: &HashMap<String, DocumentData>,
    ) -> Result<(), StorageError>;

    fn write_result_chunks(
        &mut self,
        dump_id: i64,
        result_chunks: &HashMap<usize, ResultChunkData>,
    ) -> Result<(), StorageError>;

    fn write_definitions(
        &mut self,
        dump_id: i64,
        definitions: &[MonikerLocations],
    ) -> Result<(), StorageError>;

    fn write_references(
        &mut self,
        dump_id: i64,
        references: &[MonikerLocations],
    ) -> Result<(), StorageError>;

    fn update_packages(&mut self, dump_id: i64, packages: &[Package]) -> Result<(), StorageError>;

    fn update_package_references(
        &mut self,
        dump_id: i64,
        references: &[PackageReference],
    ) -> Result<(), StorageError>;

    /// Remove completed dumps sharing this upload key.
    fn delete_overlapping_dumps(
        &mut self,
        repository_id: i64,
        commit: &str,
        root: &str,
        indexer: &str,
    ) -> Result<(), StorageError>;

    fn update_committed_at(
        &mut self,
        id: i64,
        committed_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    fn mark_complete(&mut self, id: i64) -> Result<(), StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    fn rollback(self: Box<Self>);
}
