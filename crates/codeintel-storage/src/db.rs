//! RocksDB wrapper for the code-intelligence store.
//!
//! Provides:
//! - Database open with column family setup
//! - The upload job queue (insert, dequeue, requeue, mark errored)
//! - Bundle reads by dump id
//! - Dirty-repository tokens
//! - Scoped write transactions (see [`Transaction`])

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use codeintel_types::{
    BundleData, DocumentData, Meta, MonikerLocations, NewUpload, Package, PackageReference,
    ResultChunkData, Upload, UploadState,
};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, ReadOptions, WriteBatch, DB};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_DEFINITIONS, CF_DIRTY_REPOSITORIES, CF_DOCUMENTS,
    CF_DUMPS_BY_KEY, CF_META, CF_PACKAGES, CF_PACKAGE_REFERENCES, CF_REFERENCES,
    CF_RESULT_CHUNKS, CF_UPLOADS, CF_UPLOAD_QUEUE,
};
use crate::error::StorageError;
use crate::index::{
    dump_key, errored_bound, id_suffix, prefix_end, queue_entry, QueueEntry, ERRORED_PREFIX,
    PROCESSING_PREFIX, QUEUED_PREFIX,
};
use crate::keys::{repository_key, DumpKey, UploadKey};
use crate::transaction::Transaction;

/// Row selection rules for [`Storage::dequeue`].
#[derive(Debug, Clone)]
pub struct DequeueOptions {
    /// Rows whose declared size exceeds this are skipped. Rows of unknown
    /// size are never skipped.
    pub max_size: Option<i64>,
    /// Errored rows with this many failures are no longer retried
    pub max_num_retries: u32,
    /// Delay after a failure before an errored row is eligible again
    pub retry_after: Duration,
}

impl Default for DequeueOptions {
    fn default() -> Self {
        Self {
            max_size: None,
            max_num_retries: 3,
            retry_after: Duration::minutes(5),
        }
    }
}

impl DequeueOptions {
    /// `delay` is added to the entry timestamp: zero for queued rows,
    /// `retry_after` for errored ones.
    fn admits(&self, entry: &QueueEntry, delay: Duration, now: DateTime<Utc>) -> bool {
        entry.fits(self.max_size)
            && entry.after.map_or(true, |after| {
                // An unrepresentable deadline never arrives
                after
                    .checked_add_signed(delay)
                    .map_or(false, |deadline| deadline <= now)
            })
    }
}

/// Main storage interface for the code-intelligence worker
pub struct Storage {
    pub(crate) db: DB,
    /// Next upload id
    upload_sequence: AtomicI64,
    /// Serializes upload row transitions and transaction commits
    queue_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        let upload_sequence = Self::load_upload_sequence(&db)?;

        Ok(Self {
            db,
            upload_sequence: AtomicI64::new(upload_sequence),
            queue_lock: Mutex::new(()),
        })
    }

    /// One past the highest stored upload id
    fn load_upload_sequence(db: &DB) -> Result<i64, StorageError> {
        let cf = db
            .cf_handle(CF_UPLOADS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_UPLOADS.to_string()))?;

        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            return Ok(UploadKey::from_bytes(&key)?.id + 1);
        }
        Ok(1)
    }

    pub(crate) fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, ()> {
        // The guarded state lives in RocksDB, so a poisoned lock is still usable
        self.queue_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin a write transaction.
    pub fn transact(self: &Arc<Self>) -> Transaction {
        Transaction::new(Arc::clone(self))
    }

    // ==================== Upload Queue ====================

    /// Insert a queued upload row and return it.
    pub fn insert_upload(
        &self,
        new_upload: NewUpload,
        uploaded_at: DateTime<Utc>,
    ) -> Result<Upload, StorageError> {
        let id = self.upload_sequence.fetch_add(1, Ordering::SeqCst);
        let upload = new_upload.into_upload(id, uploaded_at);

        let _guard = self.lock_queue();
        self.write_upload(None, &upload)?;
        debug!(upload_id = id, repository_id = upload.repository_id, "Inserted upload");
        Ok(upload)
    }

    pub fn get_upload(&self, id: i64) -> Result<Option<Upload>, StorageError> {
        let cf = self.cf(CF_UPLOADS)?;
        match self.db.get_cf(cf, UploadKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(Upload::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All upload rows in id order.
    pub fn list_uploads(&self) -> Result<Vec<Upload>, StorageError> {
        let cf = self.cf(CF_UPLOADS)?;
        let mut uploads = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            uploads.push(Upload::from_bytes(&value)?);
        }
        Ok(uploads)
    }

    /// Stage `upload` with its index entries, replacing those of `previous`.
    pub(crate) fn stage_upload(
        &self,
        batch: &mut WriteBatch,
        previous: Option<&Upload>,
        upload: &Upload,
    ) -> Result<(), StorageError> {
        let queue_cf = self.cf(CF_UPLOAD_QUEUE)?;
        let dumps_cf = self.cf(CF_DUMPS_BY_KEY)?;

        if let Some(previous) = previous {
            if let Some((key, _)) = queue_entry(previous) {
                batch.delete_cf(queue_cf, key);
            }
            if let Some(key) = dump_key(previous) {
                batch.delete_cf(dumps_cf, key);
            }
        }

        batch.put_cf(
            self.cf(CF_UPLOADS)?,
            UploadKey::new(upload.id).to_bytes(),
            upload.to_bytes()?,
        );
        if let Some((key, entry)) = queue_entry(upload) {
            batch.put_cf(queue_cf, key, entry.to_bytes()?);
        }
        if let Some(key) = dump_key(upload) {
            batch.put_cf(dumps_cf, key, b"");
        }
        Ok(())
    }

    fn write_upload(&self, previous: Option<&Upload>, upload: &Upload) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        self.stage_upload(&mut batch, previous, upload)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn require_upload(&self, id: i64) -> Result<Upload, StorageError> {
        self.get_upload(id)?.ok_or(StorageError::NotFound(id))
    }

    /// Visit queue index entries in `[start, end)` until `visit` returns false.
    fn scan_queue(
        &self,
        start: &[u8],
        end: Vec<u8>,
        mut visit: impl FnMut(i64, QueueEntry) -> bool,
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_UPLOAD_QUEUE)?;
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_upper_bound(end);

        let iter = self
            .db
            .iterator_cf_opt(cf, read_opts, IteratorMode::From(start, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !visit(id_suffix(&key)?, QueueEntry::from_bytes(&value)?) {
                break;
            }
        }
        Ok(())
    }

    /// Lowest id among the rows `options` admits.
    fn next_eligible(
        &self,
        options: &DequeueOptions,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StorageError> {
        let mut next: Option<i64> = None;

        // Queued entries sort by id, so the first admitted one is the lowest
        self.scan_queue(QUEUED_PREFIX, prefix_end(QUEUED_PREFIX), |id, entry| {
            if options.admits(&entry, Duration::zero(), now) {
                next = Some(id);
                return false;
            }
            true
        })?;

        // Errored entries sort by failure count first; rows out of retries
        // fall past the bound and are never read
        self.scan_queue(
            ERRORED_PREFIX,
            errored_bound(options.max_num_retries),
            |id, entry| {
                if next.map_or(true, |lowest| id < lowest)
                    && options.admits(&entry, options.retry_after, now)
                {
                    next = Some(id);
                }
                true
            },
        )?;

        Ok(next)
    }

    /// Claim the lowest-id eligible row and mark it processing.
    ///
    /// A row is eligible when it is queued and its `process_after` has
    /// passed, or when it errored fewer than `max_num_retries` times and
    /// `retry_after` has elapsed since the failure. The row is claimed under
    /// the queue lock, so a row is handed to one caller only. Candidates come
    /// from the queue index; only the claimed row is loaded.
    pub fn dequeue(
        &self,
        options: &DequeueOptions,
        now: DateTime<Utc>,
    ) -> Result<Option<Upload>, StorageError> {
        let _guard = self.lock_queue();

        let Some(id) = self.next_eligible(options, now)? else {
            return Ok(None);
        };

        let previous = self.require_upload(id)?;
        let mut upload = previous.clone();
        upload.state = UploadState::Processing;
        upload.started_at = Some(now);
        upload.process_after = None;
        self.write_upload(Some(&previous), &upload)?;

        debug!(
            upload_id = upload.id,
            repository_id = upload.repository_id,
            size = ?upload.upload_size,
            "Dequeued upload"
        );
        Ok(Some(upload))
    }

    /// Return a processing row to the queue, eligible again at `process_after`.
    ///
    /// This is a deliberate wait rather than a failed attempt: neither the
    /// failure nor the reset counter changes.
    pub fn requeue(&self, id: i64, process_after: DateTime<Utc>) -> Result<(), StorageError> {
        let _guard = self.lock_queue();

        let previous = self.require_upload(id)?;
        if previous.state != UploadState::Processing {
            return Err(StorageError::InvalidState {
                id,
                state: previous.state,
                operation: "requeue",
            });
        }

        let mut upload = previous.clone();
        upload.state = UploadState::Queued;
        upload.started_at = None;
        upload.process_after = Some(process_after);
        self.write_upload(Some(&previous), &upload)?;

        debug!(upload_id = id, %process_after, "Requeued upload");
        Ok(())
    }

    /// Record a failed attempt on a processing row.
    ///
    /// Returns false, leaving the row untouched, when the row is no longer
    /// processing (for example it was already marked complete).
    pub fn mark_errored(
        &self,
        id: i64,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let _guard = self.lock_queue();

        let previous = self.require_upload(id)?;
        if previous.state != UploadState::Processing {
            debug!(upload_id = id, state = %previous.state, "Not marking upload errored");
            return Ok(false);
        }

        let mut upload = previous.clone();
        upload.state = UploadState::Errored;
        upload.failure_message = Some(message.to_string());
        upload.finished_at = Some(now);
        upload.num_failures += 1;
        self.write_upload(Some(&previous), &upload)?;
        Ok(true)
    }

    /// Retire a queued row that will never have a raw upload, keeping it as
    /// Deleted with `reason` so it is neither claimed nor its id reused.
    pub fn abandon_upload(
        &self,
        id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let _guard = self.lock_queue();

        let previous = self.require_upload(id)?;
        if previous.state != UploadState::Queued {
            return Err(StorageError::InvalidState {
                id,
                state: previous.state,
                operation: "abandon",
            });
        }

        let mut upload = previous.clone();
        upload.state = UploadState::Deleted;
        upload.failure_message = Some(reason.to_string());
        upload.finished_at = Some(now);
        self.write_upload(Some(&previous), &upload)?;

        info!(upload_id = id, reason, "Abandoned upload");
        Ok(())
    }

    /// Return rows left processing since before `started_before` to the
    /// queue, counting a reset on each. Returns the number of rows reset.
    pub fn reset_stalled(&self, started_before: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.lock_queue();

        let mut stalled = Vec::new();
        self.scan_queue(
            PROCESSING_PREFIX,
            prefix_end(PROCESSING_PREFIX),
            |id, entry| {
                if entry.after.map_or(true, |started| started < started_before) {
                    stalled.push(id);
                }
                true
            },
        )?;

        let mut batch = WriteBatch::default();
        for id in &stalled {
            let previous = self.require_upload(*id)?;
            let mut upload = previous.clone();
            upload.state = UploadState::Queued;
            upload.started_at = None;
            upload.num_resets += 1;
            self.stage_upload(&mut batch, Some(&previous), &upload)?;
        }
        self.db.write(batch)?;

        let count = stalled.len();
        if count > 0 {
            info!(count, "Reset stalled uploads");
        }
        Ok(count)
    }

    /// Ids of the completed dumps whose upload key starts with `prefix`.
    pub(crate) fn completed_dump_ids(&self, prefix: &[u8]) -> Result<Vec<i64>, StorageError> {
        let cf = self.cf(CF_DUMPS_BY_KEY)?;
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_upper_bound(prefix_end(prefix));

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf_opt(cf, read_opts, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            ids.push(id_suffix(&key)?);
        }
        Ok(ids)
    }

    // ==================== Dirty Repositories ====================

    /// Bump the repository's dirty token and return the new value.
    ///
    /// Repeated calls coalesce: the commit graph updater only compares the
    /// token it last processed with the current one.
    pub fn mark_repository_as_dirty(&self, repository_id: i64) -> Result<u64, StorageError> {
        let _guard = self.lock_queue();

        let cf = self.cf(CF_DIRTY_REPOSITORIES)?;
        let key = repository_key(repository_id);
        let token = match self.db.get_cf(cf, &key)? {
            Some(bytes) => decode_token(&bytes)? + 1,
            None => 1,
        };
        self.db.put_cf(cf, &key, token.to_be_bytes())?;

        debug!(repository_id, token, "Marked repository as dirty");
        Ok(token)
    }

    /// Dirty token of every repository marked so far.
    pub fn dirty_repositories(&self) -> Result<HashMap<i64, u64>, StorageError> {
        let cf = self.cf(CF_DIRTY_REPOSITORIES)?;
        let mut tokens = HashMap::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let repository_id = std::str::from_utf8(&key)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    StorageError::Key(format!(
                        "Invalid repository key: {}",
                        String::from_utf8_lossy(&key)
                    ))
                })?;
            tokens.insert(repository_id, decode_token(&value)?);
        }
        Ok(tokens)
    }

    // ==================== Bundles ====================

    /// Load the bundle stored for a dump, or None if nothing was written.
    pub fn read_bundle(&self, dump_id: i64) -> Result<Option<BundleData>, StorageError> {
        let key = DumpKey::new(dump_id);
        let meta: Meta = match self.db.get_cf(self.cf(CF_META)?, key.row())? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => return Ok(None),
        };

        let mut bundle = BundleData {
            meta,
            ..Default::default()
        };

        for (path, document) in self.scan_dump::<DocumentData>(CF_DOCUMENTS, key)? {
            bundle.documents.insert(path, document);
        }
        for (index, chunk) in self.scan_dump::<ResultChunkData>(CF_RESULT_CHUNKS, key)? {
            let index: usize = index
                .parse()
                .map_err(|e| StorageError::Key(format!("Invalid chunk index {}: {}", index, e)))?;
            bundle.result_chunks.insert(index, chunk);
        }
        bundle.definitions = rows(self.scan_dump::<MonikerLocations>(CF_DEFINITIONS, key)?);
        bundle.references = rows(self.scan_dump::<MonikerLocations>(CF_REFERENCES, key)?);
        bundle.packages = rows(self.scan_dump::<Package>(CF_PACKAGES, key)?);
        bundle.package_references =
            rows(self.scan_dump::<PackageReference>(CF_PACKAGE_REFERENCES, key)?);

        Ok(Some(bundle))
    }

    /// Packages exported by a completed dump
    pub fn packages(&self, dump_id: i64) -> Result<Vec<Package>, StorageError> {
        Ok(rows(self.scan_dump(CF_PACKAGES, DumpKey::new(dump_id))?))
    }

    /// Package references of a completed dump
    pub fn package_references(&self, dump_id: i64) -> Result<Vec<PackageReference>, StorageError> {
        Ok(rows(
            self.scan_dump(CF_PACKAGE_REFERENCES, DumpKey::new(dump_id))?,
        ))
    }

    /// Rows of one dump in a column family, in key order, with key suffixes
    fn scan_dump<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        key: DumpKey,
    ) -> Result<Vec<(String, T)>, StorageError> {
        let cf = self.cf(cf_name)?;
        let prefix = key.prefix();
        let end = key.prefix_end();

        let mut results = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (row_key, value) = item?;
            if row_key.as_ref() >= end.as_slice() {
                break;
            }
            let suffix = key.suffix(&row_key)?.to_string();
            results.push((suffix, serde_json::from_slice(&value)?));
        }
        Ok(results)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }
}

fn rows<T>(scanned: Vec<(String, T)>) -> Vec<T> {
    scanned.into_iter().map(|(_, row)| row).collect()
}

fn decode_token(bytes: &[u8]) -> Result<u64, StorageError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Serialization(format!("Invalid dirty token of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}
