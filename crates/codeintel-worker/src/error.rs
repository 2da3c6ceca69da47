//! Error types for upload processing.

use codeintel_patch::PatchError;
use codeintel_storage::StorageError;
use thiserror::Error;

use crate::bundles::BundleManagerError;
use crate::correlate::CorrelateError;
use crate::gitserver::GitserverError;

/// Errors that can occur while handling an upload
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A store operation failed
    #[error("Failed to {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    /// A gitserver request failed
    #[error("Failed to {operation}: {source}")]
    Gitserver {
        operation: &'static str,
        #[source]
        source: GitserverError,
    },

    /// Fetching or deleting the raw upload failed
    #[error("Failed to {operation}: {source}")]
    BundleManager {
        operation: &'static str,
        #[source]
        source: BundleManagerError,
    },

    /// The raw upload could not be turned into a bundle
    #[error("Failed to correlate upload: {0}")]
    Correlate(#[from] CorrelateError),

    /// The incremental merge failed
    #[error("Failed to patch bundle: {0}")]
    Patch(#[from] PatchError),

    /// The dump an incremental upload builds on does not exist
    #[error("Base dump {0} not found")]
    MissingBaseDump(i64),

    /// A task moved to the blocking pool panicked
    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Shutdown was requested while waiting on an external call
    #[error("Handling cancelled")]
    Cancelled,

    /// Recording a failure on the upload row failed too
    #[error("{original}; additionally failed to mark upload errored: {secondary}")]
    MarkErrored {
        original: Box<WorkerError>,
        secondary: StorageError,
    },
}

impl WorkerError {
    /// Wrap a store error with the name of the failing operation.
    pub fn store(operation: &'static str) -> impl FnOnce(StorageError) -> WorkerError {
        move |source| WorkerError::Store { operation, source }
    }

    /// Wrap a gitserver error with the name of the failing operation.
    pub fn gitserver(operation: &'static str) -> impl FnOnce(GitserverError) -> WorkerError {
        move |source| WorkerError::Gitserver { operation, source }
    }

    /// Wrap a bundle manager error with the name of the failing operation.
    pub fn bundle_manager(
        operation: &'static str,
    ) -> impl FnOnce(BundleManagerError) -> WorkerError {
        move |source| WorkerError::BundleManager { operation, source }
    }
}
