//! [`Store`] over the RocksDB store.
//!
//! RocksDB calls block, so each one runs on tokio's blocking pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codeintel_storage::{DequeueOptions, Storage, StorageError, Transaction};
use codeintel_types::{
    BundleData, DocumentData, Meta, MonikerLocations, Package, PackageReference, ResultChunkData,
    Upload,
};

use super::{Store, StoreTransaction};

/// Run a synchronous RocksDB call on the blocking pool.
async fn blocking<T, F>(storage: &Arc<Storage>, call: F) -> Result<T, StorageError>
where
    F: FnOnce(&Storage) -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    let storage = Arc::clone(storage);
    tokio::task::spawn_blocking(move || call(&storage))
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

#[async_trait]
impl Store for Arc<Storage> {
    async fn dequeue(&self, options: &DequeueOptions) -> Result<Option<Upload>, StorageError> {
        let options = options.clone();
        blocking(self, move |storage| storage.dequeue(&options, Utc::now())).await
    }

    async fn requeue(&self, id: i64, process_after: DateTime<Utc>) -> Result<(), StorageError> {
        blocking(self, move |storage| storage.requeue(id, process_after)).await
    }

    async fn mark_errored(&self, id: i64, message: &str) -> Result<bool, StorageError> {
        let message = message.to_string();
        blocking(self, move |storage| {
            storage.mark_errored(id, &message, Utc::now())
        })
        .await
    }

    async fn mark_repository_as_dirty(&self, repository_id: i64) -> Result<(), StorageError> {
        blocking(self, move |storage| {
            storage.mark_repository_as_dirty(repository_id).map(|_| ())
        })
        .await
    }

    async fn get_upload(&self, id: i64) -> Result<Option<Upload>, StorageError> {
        blocking(self, move |storage| storage.get_upload(id)).await
    }

    async fn read_bundle(&self, dump_id: i64) -> Result<Option<BundleData>, StorageError> {
        blocking(self, move |storage| storage.read_bundle(dump_id)).await
    }

    async fn transact(&self) -> Result<Box<dyn StoreTransaction>, StorageError> {
        Ok(Box::new(Storage::transact(self)))
    }
}

#[async_trait]
impl StoreTransaction for Transaction {
    fn write_meta(&mut self, dump_id: i64, meta: &Meta) -> Result<(), StorageError> {
        Transaction::write_meta(self, dump_id, meta)
    }

    fn write_documents(
        &mut self,
        dump_id: i64,
        documents: &HashMap<String, DocumentData>,
    ) -> Result<(), StorageError> {
        Transaction::write_documents(self, dump_id, documents)
    }

    fn write_result_chunks(
        &mut self,
        dump_id: i64,
        result_chunks: &HashMap<usize, ResultChunkData>,
    ) -> Result<(), StorageError> {
        Transaction::write_result_chunks(self, dump_id, result_chunks)
    }

    fn write_definitions(
        &mut self,
        dump_id: i64,
        definitions: &[MonikerLocations],
    ) -> Result<(), StorageError> {
        Transaction::write_definitions(self, dump_id, definitions)
    }

    fn write_references(
        &mut self,
        dump_id: i64,
        references: &[MonikerLocations],
    ) -> Result<(), StorageError> {
        Transaction::write_references(self, dump_id, references)
    }

    fn update_packages(&mut self, dump_id: i64, packages: &[Package]) -> Result<(), StorageError> {
        Transaction::update_packages(self, dump_id, packages)
    }

    fn update_package_references(
        &mut self,
        dump_id: i64,
        references: &[PackageReference],
    ) -> Result<(), StorageError> {
        Transaction::update_package_references(self, dump_id, references)
    }

    fn delete_overlapping_dumps(
        &mut self,
        repository_id: i64,
        commit: &str,
        root: &str,
        indexer: &str,
    ) -> Result<(), StorageError> {
        Transaction::delete_overlapping_dumps(self, repository_id, commit, root, indexer);
        Ok(())
    }

    fn update_committed_at(
        &mut self,
        id: i64,
        committed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        Transaction::update_committed_at(self, id, committed_at);
        Ok(())
    }

    fn mark_complete(&mut self, id: i64) -> Result<(), StorageError> {
        Transaction::mark_complete(self, id);
        Ok(())
    }

    /// Commits on the blocking pool. The commit runs to completion even if
    /// the awaiting future is dropped.
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        tokio::task::spawn_blocking(move || Transaction::commit(*self))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }

    fn rollback(self: Box<Self>) {
        Transaction::rollback(*self)
    }
}
