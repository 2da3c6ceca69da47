//! Recording in-memory store for testing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codeintel_storage::{DequeueOptions, StorageError};
use codeintel_types::{
    BundleData, DocumentData, Meta, MonikerLocations, Package, PackageReference, ResultChunkData,
    Upload, UploadState,
};

use super::{Store, StoreTransaction};

/// One call made against a [`MockStore`] or one of its transactions.
///
/// Transaction calls carry the id of the transaction they were made in.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Dequeue {
        max_size: Option<i64>,
    },
    Requeue {
        id: i64,
        process_after: DateTime<Utc>,
    },
    MarkErrored {
        id: i64,
        message: String,
    },
    MarkRepositoryAsDirty {
        repository_id: i64,
    },
    Transact {
        tx: usize,
    },
    WriteMeta {
        tx: usize,
        dump_id: i64,
    },
    WriteDocuments {
        tx: usize,
        dump_id: i64,
        paths: Vec<String>,
    },
    WriteResultChunks {
        tx: usize,
        dump_id: i64,
        count: usize,
    },
    WriteDefinitions {
        tx: usize,
        dump_id: i64,
        count: usize,
    },
    WriteReferences {
        tx: usize,
        dump_id: i64,
        count: usize,
    },
    UpdatePackages {
        tx: usize,
        dump_id: i64,
        packages: Vec<Package>,
    },
    UpdatePackageReferences {
        tx: usize,
        dump_id: i64,
        references: Vec<PackageReference>,
    },
    DeleteOverlappingDumps {
        tx: usize,
        repository_id: i64,
        commit: String,
        root: String,
        indexer: String,
    },
    UpdateCommittedAt {
        tx: usize,
        id: i64,
        committed_at: DateTime<Utc>,
    },
    MarkComplete {
        tx: usize,
        id: i64,
    },
    Commit {
        tx: usize,
    },
    Rollback {
        tx: usize,
    },
}

impl StoreCall {
    /// Snake-case operation name, as accepted by [`MockStore::fail_on`].
    pub fn name(&self) -> &'static str {
        match self {
            StoreCall::Dequeue { .. } => "dequeue",
            StoreCall::Requeue { .. } => "requeue",
            StoreCall::MarkErrored { .. } => "mark_errored",
            StoreCall::MarkRepositoryAsDirty { .. } => "mark_repository_as_dirty",
            StoreCall::Transact { .. } => "transact",
            StoreCall::WriteMeta { .. } => "write_meta",
            StoreCall::WriteDocuments { .. } => "write_documents",
            StoreCall::WriteResultChunks { .. } => "write_result_chunks",
            StoreCall::WriteDefinitions { .. } => "write_definitions",
            StoreCall::WriteReferences { .. } => "write_references",
            StoreCall::UpdatePackages { .. } => "update_packages",
            StoreCall::UpdatePackageReferences { .. } => "update_package_references",
            StoreCall::DeleteOverlappingDumps { .. } => "delete_overlapping_dumps",
            StoreCall::UpdateCommittedAt { .. } => "update_committed_at",
            StoreCall::MarkComplete { .. } => "mark_complete",
            StoreCall::Commit { .. } => "commit",
            StoreCall::Rollback { .. } => "rollback",
        }
    }

    /// Whether the call changes stored data.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            StoreCall::Dequeue { .. }
                | StoreCall::Requeue { .. }
                | StoreCall::Transact { .. }
                | StoreCall::Commit { .. }
                | StoreCall::Rollback { .. }
        )
    }

    /// Transaction the call was made in, if any.
    pub fn tx(&self) -> Option<usize> {
        match self {
            StoreCall::Transact { tx }
            | StoreCall::WriteMeta { tx, .. }
            | StoreCall::WriteDocuments { tx, .. }
            | StoreCall::WriteResultChunks { tx, .. }
            | StoreCall::WriteDefinitions { tx, .. }
            | StoreCall::WriteReferences { tx, .. }
            | StoreCall::UpdatePackages { tx, .. }
            | StoreCall::UpdatePackageReferences { tx, .. }
            | StoreCall::DeleteOverlappingDumps { tx, .. }
            | StoreCall::UpdateCommittedAt { tx, .. }
            | StoreCall::MarkComplete { tx, .. }
            | StoreCall::Commit { tx }
            | StoreCall::Rollback { tx } => Some(*tx),
            _ => None,
        }
    }
}

#[derive(Default)]
struct State {
    uploads: BTreeMap<i64, Upload>,
    bundles: HashMap<i64, BundleData>,
    calls: Vec<StoreCall>,
    failures: HashSet<&'static str>,
    next_tx: usize,
}

impl State {
    /// Record `call`, failing if its operation was set to fail.
    fn record(&mut self, call: StoreCall) -> Result<(), StorageError> {
        let name = call.name();
        self.calls.push(call);
        if self.failures.contains(name) {
            return Err(StorageError::Key(format!("injected {} failure", name)));
        }
        Ok(())
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`Store`] that records every call.
///
/// Dequeue honors `max_size` and `process_after`; committed transactions
/// apply their bundle writes and row transitions.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<State>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_upload(&self, upload: Upload) {
        lock(&self.state).uploads.insert(upload.id, upload);
    }

    pub fn insert_bundle(&self, dump_id: i64, bundle: BundleData) {
        lock(&self.state).bundles.insert(dump_id, bundle);
    }

    pub fn upload(&self, id: i64) -> Option<Upload> {
        lock(&self.state).uploads.get(&id).cloned()
    }

    pub fn bundle(&self, dump_id: i64) -> Option<BundleData> {
        lock(&self.state).bundles.get(&dump_id).cloned()
    }

    /// Make every later call of the named operation fail.
    pub fn fail_on(&self, operation: &'static str) {
        lock(&self.state).failures.insert(operation);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.state).calls.clone()
    }

    /// Recorded calls of one operation.
    pub fn calls_named(&self, operation: &str) -> Vec<StoreCall> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.name() == operation)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn dequeue(&self, options: &DequeueOptions) -> Result<Option<Upload>, StorageError> {
        let mut state = lock(&self.state);
        state.record(StoreCall::Dequeue {
            max_size: options.max_size,
        })?;

        let now = Utc::now();
        let claimed = state.uploads.values_mut().find(|upload| {
            let ready = upload.state == UploadState::Queued
                && upload.process_after.map_or(true, |after| after <= now);
            let fits = match (options.max_size, upload.upload_size) {
                (Some(max), Some(size)) => size <= max,
                _ => true,
            };
            ready && fits
        });

        Ok(claimed.map(|upload| {
            upload.state = UploadState::Processing;
            upload.started_at = Some(now);
            upload.process_after = None;
            upload.clone()
        }))
    }

    async fn requeue(&self, id: i64, process_after: DateTime<Utc>) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        state.record(StoreCall::Requeue { id, process_after })?;

        let upload = state.uploads.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        upload.state = UploadState::Queued;
        upload.started_at = None;
        upload.process_after = Some(process_after);
        Ok(())
    }

    async fn mark_errored(&self, id: i64, message: &str) -> Result<bool, StorageError> {
        let mut state = lock(&self.state);
        state.record(StoreCall::MarkErrored {
            id,
            message: message.to_string(),
        })?;

        let upload = state.uploads.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        if upload.state != UploadState::Processing {
            return Ok(false);
        }
        upload.state = UploadState::Errored;
        upload.failure_message = Some(message.to_string());
        upload.finished_at = Some(Utc::now());
        upload.num_failures += 1;
        Ok(true)
    }

    async fn mark_repository_as_dirty(&self, repository_id: i64) -> Result<(), StorageError> {
        lock(&self.state).record(StoreCall::MarkRepositoryAsDirty { repository_id })
    }

    async fn get_upload(&self, id: i64) -> Result<Option<Upload>, StorageError> {
        Ok(self.upload(id))
    }

    async fn read_bundle(&self, dump_id: i64) -> Result<Option<BundleData>, StorageError> {
        Ok(self.bundle(dump_id))
    }

    async fn transact(&self) -> Result<Box<dyn StoreTransaction>, StorageError> {
        let mut state = lock(&self.state);
        state.next_tx += 1;
        let tx = state.next_tx;
        state.record(StoreCall::Transact { tx })?;

        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
            tx,
            staged: HashMap::new(),
            committed_at: Vec::new(),
            completed: Vec::new(),
            overlapping: Vec::new(),
        }))
    }
}

/// Bundle tables written for one dump in a transaction.
#[derive(Default)]
struct Staged {
    meta: Option<Meta>,
    documents: Option<HashMap<String, DocumentData>>,
    result_chunks: Option<HashMap<usize, ResultChunkData>>,
    definitions: Option<Vec<MonikerLocations>>,
    references: Option<Vec<MonikerLocations>>,
    packages: Option<Vec<Package>>,
    package_references: Option<Vec<PackageReference>>,
}

impl Staged {
    fn apply(self, bundle: &mut BundleData) {
        if let Some(meta) = self.meta {
            bundle.meta = meta;
        }
        if let Some(documents) = self.documents {
            bundle.documents = documents;
        }
        if let Some(result_chunks) = self.result_chunks {
            bundle.result_chunks = result_chunks;
        }
        if let Some(definitions) = self.definitions {
            bundle.definitions = definitions;
        }
        if let Some(references) = self.references {
            bundle.references = references;
        }
        if let Some(packages) = self.packages {
            bundle.packages = packages;
        }
        if let Some(package_references) = self.package_references {
            bundle.package_references = package_references;
        }
    }
}

/// Transaction of a [`MockStore`]. Effects are applied on commit.
struct MockTransaction {
    state: Arc<Mutex<State>>,
    tx: usize,
    staged: HashMap<i64, Staged>,
    committed_at: Vec<(i64, DateTime<Utc>)>,
    completed: Vec<i64>,
    overlapping: Vec<(i64, String, String, String)>,
}

impl MockTransaction {
    fn record(&self, call: StoreCall) -> Result<(), StorageError> {
        lock(&self.state).record(call)
    }

    fn staged(&mut self, dump_id: i64) -> &mut Staged {
        self.staged.entry(dump_id).or_default()
    }
}

#[async_trait]
impl StoreTransaction for MockTransaction {
    fn write_meta(&mut self, dump_id: i64, meta: &Meta) -> Result<(), StorageError> {
        self.record(StoreCall::WriteMeta {
            tx: self.tx,
            dump_id,
        })?;
        self.staged(dump_id).meta = Some(*meta);
        Ok(())
    }

    fn write_documents(
        &mut self,
        dump_id: i64,
        documents: &HashMap<String, DocumentData>,
    ) -> Result<(), StorageError> {
        let mut paths: Vec<String> = documents.keys().cloned().collect();
        paths.sort();
        self.record(StoreCall::WriteDocuments {
            tx: self.tx,
            dump_id,
            paths,
        })?;
        self.staged(dump_id).documents = Some(documents.clone());
        Ok(())
    }

    fn write_result_chunks(
        &mut self,
        dump_id: i64,
        result_chunks: &HashMap<usize, ResultChunkData>,
    ) -> Result<(), StorageError> {
        self.record(StoreCall::WriteResultChunks {
            tx: self.tx,
            dump_id,
            count: result_chunks.len(),
        })?;
        self.staged(dump_id).result_chunks = Some(result_chunks.clone());
        Ok(())
    }

    fn write_definitions(
        &mut self,
        dump_id: i64,
        definitions: &[MonikerLocations],
    ) -> Result<(), StorageError> {
        self.record(StoreCall::WriteDefinitions {
            tx: self.tx,
            dump_id,
            count: definitions.len(),
        })?;
        self.staged(dump_id).definitions = Some(definitions.to_vec());
        Ok(())
    }

    fn write_references(
        &mut self,
        dump_id: i64,
        references: &[MonikerLocations],
    ) -> Result<(), StorageError> {
        self.record(StoreCall::WriteReferences {
            tx: self.tx,
            dump_id,
            count: references.len(),
        })?;
        self.staged(dump_id).references = Some(references.to_vec());
        Ok(())
    }

    fn update_packages(&mut self, dump_id: i64, packages: &[Package]) -> Result<(), StorageError> {
        self.record(StoreCall::UpdatePackages {
            tx: self.tx,
            dump_id,
            packages: packages.to_vec(),
        })?;
        self.staged(dump_id).packages = Some(packages.to_vec());
        Ok(())
    }

    fn update_package_references(
        &mut self,
        dump_id: i64,
        references: &[PackageReference],
    ) -> Result<(), StorageError> {
        self.record(StoreCall::UpdatePackageReferences {
            tx: self.tx,
            dump_id,
            references: references.to_vec(),
        })?;
        self.staged(dump_id).package_references = Some(references.to_vec());
        Ok(())
    }

    fn delete_overlapping_dumps(
        &mut self,
        repository_id: i64,
        commit: &str,
        root: &str,
        indexer: &str,
    ) -> Result<(), StorageError> {
        self.record(StoreCall::DeleteOverlappingDumps {
            tx: self.tx,
            repository_id,
            commit: commit.to_string(),
            root: root.to_string(),
            indexer: indexer.to_string(),
        })?;
        self.overlapping.push((
            repository_id,
            commit.to_string(),
            root.to_string(),
            indexer.to_string(),
        ));
        Ok(())
    }

    fn update_committed_at(
        &mut self,
        id: i64,
        committed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.record(StoreCall::UpdateCommittedAt {
            tx: self.tx,
            id,
            committed_at,
        })?;
        self.committed_at.push((id, committed_at));
        Ok(())
    }

    fn mark_complete(&mut self, id: i64) -> Result<(), StorageError> {
        self.record(StoreCall::MarkComplete { tx: self.tx, id })?;
        self.completed.push(id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MockTransaction {
            state,
            tx,
            staged,
            committed_at,
            completed,
            overlapping,
        } = *self;
        let mut state = lock(&state);
        state.record(StoreCall::Commit { tx })?;

        for (repository_id, commit, root, indexer) in &overlapping {
            let key = (*repository_id, commit.as_str(), root.as_str(), indexer.as_str());
            let deleted: Vec<i64> = state
                .uploads
                .values()
                .filter(|upload| upload.state == UploadState::Completed && upload.unique_key() == key)
                .map(|upload| upload.id)
                .collect();
            for id in deleted {
                if let Some(upload) = state.uploads.get_mut(&id) {
                    upload.state = UploadState::Deleted;
                }
                state.bundles.remove(&id);
            }
        }

        // Validate row transitions before applying anything
        for id in &completed {
            let upload = state.uploads.get(id).ok_or(StorageError::NotFound(*id))?;
            if upload.state != UploadState::Processing {
                return Err(StorageError::InvalidState {
                    id: *id,
                    state: upload.state,
                    operation: "mark complete",
                });
            }
        }

        for (dump_id, tables) in staged {
            tables.apply(state.bundles.entry(dump_id).or_default());
        }

        for (id, committed_at) in committed_at {
            if let Some(upload) = state.uploads.get_mut(&id) {
                upload.committed_at = Some(committed_at);
            }
        }

        for id in completed {
            if let Some(upload) = state.uploads.get_mut(&id) {
                upload.state = UploadState::Completed;
                upload.finished_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        let _ = lock(&self.state).record(StoreCall::Rollback { tx: self.tx });
    }
}
