//! Turning a raw upload into a [`BundleData`].

mod json;

pub use json::{JsonCorrelator, RawBundle, RawPackageReference};

use std::collections::HashMap;

use async_trait::async_trait;
use codeintel_bloom::BloomFilterError;
use codeintel_types::BundleData;
use thiserror::Error;

use crate::gitserver::{GitserverClient, GitserverError};

/// Error type for correlation.
#[derive(Debug, Error)]
pub enum CorrelateError {
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Path lookup failed: {0}")]
    Gitserver(#[from] GitserverError),

    #[error("Bloom filter error: {0}")]
    Bloom(#[from] BloomFilterError),

    #[error("Correlation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Answers which files exist in the indexed commit.
#[async_trait]
pub trait PathExistenceChecker: Send + Sync {
    /// See [`GitserverClient::directory_children`].
    async fn directory_children(
        &self,
        dirnames: &[String],
    ) -> Result<HashMap<String, Vec<String>>, GitserverError>;
}

/// Path lookups for one commit of one repository, answered by gitserver.
pub struct CommitFiles<'a> {
    gitserver: &'a dyn GitserverClient,
    repository_id: i64,
    commit: &'a str,
}

impl<'a> CommitFiles<'a> {
    pub fn new(gitserver: &'a dyn GitserverClient, repository_id: i64, commit: &'a str) -> Self {
        Self {
            gitserver,
            repository_id,
            commit,
        }
    }
}

#[async_trait]
impl PathExistenceChecker for CommitFiles<'_> {
    async fn directory_children(
        &self,
        dirnames: &[String],
    ) -> Result<HashMap<String, Vec<String>>, GitserverError> {
        self.gitserver
            .directory_children(self.repository_id, self.commit, dirnames)
            .await
    }
}

/// Produces a bundle from raw upload bytes.
#[async_trait]
pub trait Correlator: Send + Sync {
    /// Parse `raw`, keep only documents that exist under `root` according to
    /// `paths`, and return the bundle with root-relative paths.
    async fn correlate(
        &self,
        raw: Vec<u8>,
        root: &str,
        paths: &dyn PathExistenceChecker,
    ) -> Result<BundleData, CorrelateError>;
}
