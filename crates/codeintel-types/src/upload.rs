//! Upload records: one queued unit of ingestion work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Waiting to be claimed by a worker
    Queued,
    /// Claimed by exactly one worker
    Processing,
    /// Bundle persisted and visible as a dump
    Completed,
    /// Last attempt failed; may be retried by the queue
    Errored,
    /// Superseded by a newer dump with the same unique key, or abandoned
    /// before its raw upload was stored
    Deleted,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Queued => "queued",
            UploadState::Processing => "processing",
            UploadState::Completed => "completed",
            UploadState::Errored => "errored",
            UploadState::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upload row as stored by the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub repository_id: i64,
    /// 40-character hex commit hash
    pub commit: String,
    /// Root path prefix of the index within the repository
    pub root: String,
    pub indexer: String,
    /// Declared size of the raw upload in bytes, if known
    #[serde(default)]
    pub upload_size: Option<i64>,
    pub state: UploadState,
    #[serde(default)]
    pub failure_message: Option<String>,
    /// Times the row was reset after being stalled
    #[serde(default)]
    pub num_resets: u32,
    /// Failed processing attempts
    #[serde(default)]
    pub num_failures: u32,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Not eligible for dequeue before this time
    #[serde(default)]
    pub process_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub committed_at: Option<DateTime<Utc>>,
    /// Dump this upload incrementally re-indexes, if any
    #[serde(default)]
    pub patch_base_id: Option<i64>,
}

impl Upload {
    /// The key that at most one completed dump may hold at a time.
    pub fn unique_key(&self) -> (i64, &str, &str, &str) {
        (
            self.repository_id,
            self.commit.as_str(),
            self.root.as_str(),
            self.indexer.as_str(),
        )
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Fields supplied when a client submits a raw index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUpload {
    pub repository_id: i64,
    pub commit: String,
    pub root: String,
    pub indexer: String,
    pub upload_size: Option<i64>,
    pub patch_base_id: Option<i64>,
}

impl NewUpload {
    /// Build the queued row for this submission.
    pub fn into_upload(self, id: i64, uploaded_at: DateTime<Utc>) -> Upload {
        Upload {
            id,
            repository_id: self.repository_id,
            commit: self.commit,
            root: self.root,
            indexer: self.indexer,
            upload_size: self.upload_size,
            state: UploadState::Queued,
            failure_message: None,
            num_resets: 0,
            num_failures: 0,
            uploaded_at,
            started_at: None,
            finished_at: None,
            process_after: None,
            committed_at: None,
            patch_base_id: self.patch_base_id,
        }
    }
}
