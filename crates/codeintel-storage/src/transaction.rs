//! Scoped write transactions.
//!
//! Bundle and package rows are staged in a RocksDB `WriteBatch` as they are
//! written. Upload row transitions (overlap deletion, committed-at, mark
//! complete) are recorded and evaluated at commit time under the queue lock,
//! then written in the same batch with their index entries. Overlapping dumps
//! are found through the completed-dump key index. Nothing is visible until
//! [`Transaction::commit`]; a transaction dropped without commit is rolled
//! back.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use codeintel_types::{
    DocumentData, Meta, MonikerLocations, Package, PackageReference, ResultChunkData, Upload,
    UploadState,
};
use rocksdb::WriteBatch;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::column_families::{
    CF_DEFINITIONS, CF_DOCUMENTS, CF_META, CF_PACKAGES, CF_PACKAGE_REFERENCES, CF_REFERENCES,
    CF_RESULT_CHUNKS, DUMP_CF_NAMES,
};
use crate::db::Storage;
use crate::error::StorageError;
use crate::index::dump_key_prefix;
use crate::keys::DumpKey;

/// Upload row change applied at commit
#[derive(Debug, Clone)]
enum UploadOp {
    DeleteOverlapping {
        repository_id: i64,
        commit: String,
        root: String,
        indexer: String,
    },
    UpdateCommittedAt {
        id: i64,
        committed_at: DateTime<Utc>,
    },
    MarkComplete {
        id: i64,
    },
}

/// A write transaction over the store. See the module docs.
pub struct Transaction {
    storage: Arc<Storage>,
    batch: WriteBatch,
    upload_ops: Vec<UploadOp>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            batch: WriteBatch::default(),
            upload_ops: Vec::new(),
            finished: false,
        }
    }

    /// Stage `rows` as the complete content of one dump in a column family,
    /// replacing anything stored there before.
    fn replace_rows<T: Serialize>(
        &mut self,
        cf_name: &str,
        key: DumpKey,
        rows: impl IntoIterator<Item = (Vec<u8>, T)>,
    ) -> Result<usize, StorageError> {
        let cf = self.storage.cf(cf_name)?;
        self.batch
            .delete_range_cf(cf, key.prefix(), key.prefix_end());

        let mut count = 0;
        for (row_key, row) in rows {
            self.batch.put_cf(cf, row_key, serde_json::to_vec(&row)?);
            count += 1;
        }
        Ok(count)
    }

    pub fn write_meta(&mut self, dump_id: i64, meta: &Meta) -> Result<(), StorageError> {
        let key = DumpKey::new(dump_id);
        self.replace_rows(CF_META, key, [(key.row(), meta)])?;
        Ok(())
    }

    pub fn write_documents(
        &mut self,
        dump_id: i64,
        documents: &HashMap<String, DocumentData>,
    ) -> Result<(), StorageError> {
        let key = DumpKey::new(dump_id);
        let count = self.replace_rows(
            CF_DOCUMENTS,
            key,
            documents
                .iter()
                .map(|(path, document)| (key.named(path), document)),
        )?;
        debug!(dump_id, count, "Staged documents");
        Ok(())
    }

    pub fn write_result_chunks(
        &mut self,
        dump_id: i64,
        result_chunks: &HashMap<usize, ResultChunkData>,
    ) -> Result<(), StorageError> {
        let key = DumpKey::new(dump_id);
        let count = self.replace_rows(
            CF_RESULT_CHUNKS,
            key,
            result_chunks
                .iter()
                .map(|(index, chunk)| (key.indexed(*index), chunk)),
        )?;
        debug!(dump_id, count, "Staged result chunks");
        Ok(())
    }

    pub fn write_definitions(
        &mut self,
        dump_id: i64,
        definitions: &[MonikerLocations],
    ) -> Result<(), StorageError> {
        self.write_ordered(CF_DEFINITIONS, dump_id, definitions)
    }

    pub fn write_references(
        &mut self,
        dump_id: i64,
        references: &[MonikerLocations],
    ) -> Result<(), StorageError> {
        self.write_ordered(CF_REFERENCES, dump_id, references)
    }

    /// Record the packages a dump exports.
    pub fn update_packages(
        &mut self,
        dump_id: i64,
        packages: &[Package],
    ) -> Result<(), StorageError> {
        self.write_ordered(CF_PACKAGES, dump_id, packages)
    }

    /// Record the packages a dump imports, each with its identifier filter.
    pub fn update_package_references(
        &mut self,
        dump_id: i64,
        references: &[PackageReference],
    ) -> Result<(), StorageError> {
        self.write_ordered(CF_PACKAGE_REFERENCES, dump_id, references)
    }

    fn write_ordered<T: Serialize>(
        &mut self,
        cf_name: &str,
        dump_id: i64,
        rows: &[T],
    ) -> Result<(), StorageError> {
        let key = DumpKey::new(dump_id);
        let count = self.replace_rows(
            cf_name,
            key,
            rows.iter().enumerate().map(|(i, row)| (key.indexed(i), row)),
        )?;
        debug!(dump_id, table = cf_name, count, "Staged rows");
        Ok(())
    }

    /// Delete every completed dump with this (repository, commit, root,
    /// indexer) key. Evaluated at commit, before later row changes of this
    /// transaction.
    pub fn delete_overlapping_dumps(
        &mut self,
        repository_id: i64,
        commit: &str,
        root: &str,
        indexer: &str,
    ) {
        self.upload_ops.push(UploadOp::DeleteOverlapping {
            repository_id,
            commit: commit.to_string(),
            root: root.to_string(),
            indexer: indexer.to_string(),
        });
    }

    pub fn update_committed_at(&mut self, id: i64, committed_at: DateTime<Utc>) {
        self.upload_ops
            .push(UploadOp::UpdateCommittedAt { id, committed_at });
    }

    /// Mark a processing upload complete, making its dump visible.
    pub fn mark_complete(&mut self, id: i64) {
        self.upload_ops.push(UploadOp::MarkComplete { id });
    }

    /// Apply all staged writes atomically.
    ///
    /// On error nothing is written.
    pub fn commit(mut self) -> Result<(), StorageError> {
        self.finished = true;
        let mut batch = std::mem::take(&mut self.batch);
        let upload_ops = std::mem::take(&mut self.upload_ops);

        let storage = Arc::clone(&self.storage);
        let _guard = storage.lock_queue();

        let now = Utc::now();
        let mut rows = UploadRows::new(&storage);
        let mut deleted = Vec::new();

        for op in upload_ops {
            match op {
                UploadOp::DeleteOverlapping {
                    repository_id,
                    commit,
                    root,
                    indexer,
                } => {
                    let key = (repository_id, commit.as_str(), root.as_str(), indexer.as_str());
                    let prefix = dump_key_prefix(repository_id, &commit, &root, &indexer);

                    // Completed rows from the key index, plus rows this
                    // transaction already completed
                    let mut candidates: BTreeSet<i64> =
                        storage.completed_dump_ids(&prefix)?.into_iter().collect();
                    candidates.extend(rows.completed_with_key(key));

                    for id in candidates {
                        let mut upload = rows.load(id)?;
                        if upload.state == UploadState::Completed && upload.unique_key() == key {
                            upload.state = UploadState::Deleted;
                            deleted.push(id);
                        }
                        rows.update(upload);
                    }
                }
                UploadOp::UpdateCommittedAt { id, committed_at } => {
                    let mut upload = rows.load(id)?;
                    upload.committed_at = Some(committed_at);
                    rows.update(upload);
                }
                UploadOp::MarkComplete { id } => {
                    let mut upload = rows.load(id)?;
                    if upload.state != UploadState::Processing {
                        return Err(StorageError::InvalidState {
                            id,
                            state: upload.state,
                            operation: "mark complete",
                        });
                    }
                    upload.state = UploadState::Completed;
                    upload.finished_at = Some(now);
                    upload.failure_message = None;
                    rows.update(upload);
                }
            }
        }

        for dump_id in &deleted {
            let key = DumpKey::new(*dump_id);
            for cf_name in DUMP_CF_NAMES {
                batch.delete_range_cf(storage.cf(cf_name)?, key.prefix(), key.prefix_end());
            }
        }

        let uploads = rows.stage(&mut batch)?;
        let operations = batch.len();
        storage.db.write(batch)?;

        if !deleted.is_empty() {
            info!(dumps = ?deleted, "Deleted overlapping dumps");
        }
        debug!(operations, uploads, "Committed transaction");
        Ok(())
    }

    /// Discard all staged writes.
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(
            operations = self.batch.len(),
            "Rolled back transaction"
        );
    }
}

/// Upload rows touched by a commit: the stored version of each, for index
/// maintenance, and the pending version.
struct UploadRows<'a> {
    storage: &'a Storage,
    stored: HashMap<i64, Upload>,
    pending: HashMap<i64, Upload>,
}

impl<'a> UploadRows<'a> {
    fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            stored: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Current version of a row: the pending change if any, else the stored row.
    fn load(&mut self, id: i64) -> Result<Upload, StorageError> {
        if let Some(upload) = self.pending.remove(&id) {
            return Ok(upload);
        }
        let upload = self
            .storage
            .get_upload(id)?
            .ok_or(StorageError::NotFound(id))?;
        self.stored.insert(id, upload.clone());
        Ok(upload)
    }

    fn update(&mut self, upload: Upload) {
        self.pending.insert(upload.id, upload);
    }

    fn completed_with_key(&self, key: (i64, &str, &str, &str)) -> Vec<i64> {
        self.pending
            .values()
            .filter(|upload| upload.state == UploadState::Completed && upload.unique_key() == key)
            .map(|upload| upload.id)
            .collect()
    }

    /// Stage every pending row with its index entries. Returns the row count.
    fn stage(self, batch: &mut WriteBatch) -> Result<usize, StorageError> {
        for upload in self.pending.values() {
            self.storage
                .stage_upload(batch, self.stored.get(&upload.id), upload)?;
        }
        Ok(self.pending.len())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                operations = self.batch.len(),
                "Transaction dropped without commit; rolling back"
            );
        }
    }
}
