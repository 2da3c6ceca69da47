//! Processing of a single upload.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use codeintel_patch::patch_bundle;
use codeintel_types::{BundleData, FileStatus, Upload, UploadState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bundles::BundleManagerClient;
use crate::correlate::{CommitFiles, Correlator};
use crate::error::WorkerError;
use crate::gitserver::{GitserverClient, GitserverError};
use crate::store::Store;
use crate::writer::PersistenceWriter;

/// Seconds an upload waits when its repository is still being cloned.
pub const CLONE_IN_PROGRESS_DELAY_SECS: i64 = 60;

/// Result of handling an upload that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The dump is visible and the raw upload deleted
    Completed,
    /// The upload went back to the queue without counting an attempt
    Requeued { process_after: DateTime<Utc> },
}

/// Turns one claimed upload into a published dump.
pub struct Handler {
    store: Arc<dyn Store>,
    writer: PersistenceWriter,
    bundle_manager: Arc<dyn BundleManagerClient>,
    gitserver: Arc<dyn GitserverClient>,
    correlator: Arc<dyn Correlator>,
}

impl Handler {
    pub fn new(
        store: Arc<dyn Store>,
        bundle_manager: Arc<dyn BundleManagerClient>,
        gitserver: Arc<dyn GitserverClient>,
        correlator: Arc<dyn Correlator>,
    ) -> Self {
        Self {
            writer: PersistenceWriter::new(Arc::clone(&store)),
            store,
            bundle_manager,
            gitserver,
            correlator,
        }
    }

    /// Handle an upload and record a failure on its row.
    ///
    /// A failed attempt is recorded with `mark_errored`; if that fails too,
    /// both errors are returned together. A cancelled attempt is requeued
    /// for immediate retry without counting a failure.
    pub async fn process(
        &self,
        upload: &Upload,
        token: &CancellationToken,
    ) -> Result<HandleOutcome, WorkerError> {
        let err = match self.handle(upload, token).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };

        if matches!(err, WorkerError::Cancelled) {
            self.store
                .requeue(upload.id, Utc::now())
                .await
                .map_err(WorkerError::store("requeue cancelled upload"))?;
            return Err(err);
        }

        match self.store.mark_errored(upload.id, &err.to_string()).await {
            Ok(recorded) => {
                if !recorded {
                    debug!(upload_id = upload.id, "Upload was no longer processing");
                }
                Err(err)
            }
            Err(secondary) => Err(WorkerError::MarkErrored {
                original: Box::new(err),
                secondary,
            }),
        }
    }

    /// Handle an upload without recording failures.
    ///
    /// Cancellation is observed only while waiting on gitserver, the raw
    /// upload store or the correlator, never during a merge or a write.
    /// The merge and store writes run on the blocking pool.
    pub async fn handle(
        &self,
        upload: &Upload,
        token: &CancellationToken,
    ) -> Result<HandleOutcome, WorkerError> {
        let resolved = until_cancelled(
            token,
            self.gitserver
                .resolve_revision(upload.repository_id, &upload.commit),
        )
        .await?;

        match resolved {
            Ok(()) => {}
            Err(GitserverError::CloneInProgress { .. }) => {
                let process_after = Utc::now() + Duration::seconds(CLONE_IN_PROGRESS_DELAY_SECS);
                self.store
                    .requeue(upload.id, process_after)
                    .await
                    .map_err(WorkerError::store("requeue upload"))?;

                info!(
                    upload_id = upload.id,
                    repository_id = upload.repository_id,
                    %process_after,
                    "Repository is still cloning, requeued upload"
                );
                return Ok(HandleOutcome::Requeued { process_after });
            }
            Err(e) => return Err(WorkerError::gitserver("resolve revision")(e)),
        }

        let committed_at = until_cancelled(
            token,
            self.gitserver
                .commit_date(upload.repository_id, &upload.commit),
        )
        .await?
        .map_err(WorkerError::gitserver("get commit date"))?;

        let raw = until_cancelled(token, self.bundle_manager.get_upload(upload.id))
            .await?
            .map_err(WorkerError::bundle_manager("fetch raw upload"))?;

        let bundle = self.bundle_for(upload, raw, token).await?;

        if token.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        self.writer.write(upload.id, &bundle).await?;
        self.writer.publish(upload, &bundle, committed_at).await?;

        // The dump is visible from here on. Both cleanups run even if one fails.
        let dirty = self
            .store
            .mark_repository_as_dirty(upload.repository_id)
            .await
            .map_err(WorkerError::store("mark repository as dirty"));
        let deleted = self
            .bundle_manager
            .delete_upload(upload.id)
            .await
            .map_err(WorkerError::bundle_manager("delete raw upload"));
        dirty?;
        deleted?;

        info!(
            upload_id = upload.id,
            repository_id = upload.repository_id,
            documents = bundle.documents.len(),
            "Processed upload"
        );
        Ok(HandleOutcome::Completed)
    }

    /// Correlate the raw upload and, for an incremental upload, merge it onto
    /// its base dump.
    async fn bundle_for(
        &self,
        upload: &Upload,
        raw: Vec<u8>,
        token: &CancellationToken,
    ) -> Result<BundleData, WorkerError> {
        let files = CommitFiles::new(self.gitserver.as_ref(), upload.repository_id, &upload.commit);
        let bundle = until_cancelled(token, self.correlator.correlate(raw, &upload.root, &files))
            .await??;

        let Some(base_id) = upload.patch_base_id else {
            return Ok(bundle);
        };

        let base_upload = self
            .store
            .get_upload(base_id)
            .await
            .map_err(WorkerError::store("load base upload"))?
            .filter(|base| base.state == UploadState::Completed)
            .ok_or(WorkerError::MissingBaseDump(base_id))?;
        let base = self
            .store
            .read_bundle(base_id)
            .await
            .map_err(WorkerError::store("read base bundle"))?
            .ok_or(WorkerError::MissingBaseDump(base_id))?;

        let changes = until_cancelled(
            token,
            self.gitserver
                .file_status(upload.repository_id, &base_upload.commit, &upload.commit),
        )
        .await?
        .map_err(WorkerError::gitserver("get file status"))?;

        let file_status = root_relative(changes, &upload.root);
        let reindexed: HashSet<String> = bundle.documents.keys().cloned().collect();

        debug!(
            upload_id = upload.id,
            base_id,
            changed = file_status.len(),
            reindexed = reindexed.len(),
            "Patching base dump"
        );

        // The merge walks both whole bundles. On the blocking pool it neither
        // stalls other handlers nor stops early if this future is dropped.
        let patched = tokio::task::spawn_blocking(move || {
            patch_bundle(base, bundle, &reindexed, &file_status)
        })
        .await??;
        Ok(patched)
    }
}

/// Await `future` unless `token` is cancelled first. A token that is already
/// cancelled wins even over a ready future.
async fn until_cancelled<F: Future>(
    token: &CancellationToken,
    future: F,
) -> Result<F::Output, WorkerError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(WorkerError::Cancelled),
        output = future => Ok(output),
    }
}

/// Keep the statuses of files under `root`, keyed relative to it.
fn root_relative(
    status: HashMap<String, FileStatus>,
    root: &str,
) -> HashMap<String, FileStatus> {
    let root = root.trim_start_matches("./").trim_matches('/');
    if root.is_empty() {
        return status;
    }

    let prefix = format!("{}/", root);
    status
        .into_iter()
        .filter_map(|(path, status)| {
            path.strip_prefix(&prefix)
                .map(|relative| (relative.to_string(), status))
        })
        .collect()
}
