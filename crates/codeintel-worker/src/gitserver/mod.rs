//! Commit resolution and repository contents.
//!
//! The worker asks gitserver whether a commit can be resolved before doing
//! any work for an upload. A repository that is still cloning cannot answer
//! yet, which is reported as [`GitserverError::CloneInProgress`] so the
//! upload can wait instead of failing.

mod http;
mod mock;

pub use http::{HttpGitserverClient, HttpGitserverConfig};
pub use mock::MockGitserverClient;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codeintel_types::FileStatus;
use thiserror::Error;

/// Error type for gitserver requests.
#[derive(Debug, Error)]
pub enum GitserverError {
    #[error("Repository {repository_id} is still being cloned")]
    CloneInProgress { repository_id: i64 },

    #[error("Revision {commit} not found in repository {repository_id}")]
    RevisionNotFound { repository_id: i64, commit: String },

    #[error("Gitserver request failed: {0}")]
    Request(String),

    #[error("Invalid gitserver response: {0}")]
    InvalidResponse(String),
}

impl GitserverError {
    /// Whether the request may succeed if simply repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, GitserverError::Request(_))
    }
}

/// Access to a repository's commits and files.
#[async_trait]
pub trait GitserverClient: Send + Sync {
    /// Succeeds when the commit exists and the repository is cloned.
    async fn resolve_revision(&self, repository_id: i64, commit: &str)
        -> Result<(), GitserverError>;

    /// Files and directories directly under each of `dirnames` at the commit.
    ///
    /// Dirnames are repository relative, `""` being the repository root.
    /// Children are returned as full repository-relative paths. A dirname
    /// that does not exist maps to an empty list.
    async fn directory_children(
        &self,
        repository_id: i64,
        commit: &str,
        dirnames: &[String],
    ) -> Result<HashMap<String, Vec<String>>, GitserverError>;

    /// Committer date of the commit.
    async fn commit_date(
        &self,
        repository_id: i64,
        commit: &str,
    ) -> Result<DateTime<Utc>, GitserverError>;

    /// How each file differs between `base_commit` and `commit`. Files that
    /// did not change may be omitted.
    async fn file_status(
        &self,
        repository_id: i64,
        base_commit: &str,
        commit: &str,
    ) -> Result<HashMap<String, FileStatus>, GitserverError>;
}
