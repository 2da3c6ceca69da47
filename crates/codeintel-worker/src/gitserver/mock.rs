//! In-memory gitserver for testing.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use codeintel_types::FileStatus;

use super::{GitserverClient, GitserverError};

/// Gitserver double serving a fixed file list.
///
/// Every commit resolves unless [`MockGitserverClient::set_cloning`] or
/// [`MockGitserverClient::set_unresolvable`] says otherwise.
pub struct MockGitserverClient {
    files: BTreeSet<String>,
    commit_date: DateTime<Utc>,
    file_status: Mutex<HashMap<String, FileStatus>>,
    cloning: AtomicBool,
    unresolvable: AtomicBool,
    resolve_calls: AtomicUsize,
    directory_children_calls: AtomicUsize,
}

impl MockGitserverClient {
    pub fn new() -> Self {
        Self {
            files: BTreeSet::new(),
            commit_date: Utc
                .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            file_status: Mutex::new(HashMap::new()),
            cloning: AtomicBool::new(false),
            unresolvable: AtomicBool::new(false),
            resolve_calls: AtomicUsize::new(0),
            directory_children_calls: AtomicUsize::new(0),
        }
    }

    /// Serve these repository-relative file paths at every commit.
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_commit_date(mut self, commit_date: DateTime<Utc>) -> Self {
        self.commit_date = commit_date;
        self
    }

    /// Report clone-in-progress for every revision until cleared.
    pub fn set_cloning(&self, cloning: bool) {
        self.cloning.store(cloning, Ordering::SeqCst);
    }

    /// Report every revision as missing until cleared.
    pub fn set_unresolvable(&self, unresolvable: bool) {
        self.unresolvable.store(unresolvable, Ordering::SeqCst);
    }

    pub fn set_file_status(&self, status: HashMap<String, FileStatus>) {
        *self.lock_status() = status;
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn directory_children_calls(&self) -> usize {
        self.directory_children_calls.load(Ordering::SeqCst)
    }

    fn lock_status(&self) -> MutexGuard<'_, HashMap<String, FileStatus>> {
        self.file_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Direct children of `dirname` among the known files.
    fn children_of(&self, dirname: &str) -> Vec<String> {
        let prefix = if dirname.is_empty() {
            String::new()
        } else {
            format!("{}/", dirname.trim_end_matches('/'))
        };

        let children: BTreeSet<String> = self
            .files
            .iter()
            .filter_map(|file| file.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((child_dir, _)) => format!("{}{}", prefix, child_dir),
                None => format!("{}{}", prefix, rest),
            })
            .collect();
        children.into_iter().collect()
    }
}

impl Default for MockGitserverClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitserverClient for MockGitserverClient {
    async fn resolve_revision(
        &self,
        repository_id: i64,
        commit: &str,
    ) -> Result<(), GitserverError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);

        if self.cloning.load(Ordering::SeqCst) {
            return Err(GitserverError::CloneInProgress { repository_id });
        }
        if self.unresolvable.load(Ordering::SeqCst) {
            return Err(GitserverError::RevisionNotFound {
                repository_id,
                commit: commit.to_string(),
            });
        }
        Ok(())
    }

    async fn directory_children(
        &self,
        _repository_id: i64,
        _commit: &str,
        dirnames: &[String],
    ) -> Result<HashMap<String, Vec<String>>, GitserverError> {
        self.directory_children_calls.fetch_add(1, Ordering::SeqCst);

        Ok(dirnames
            .iter()
            .map(|dirname| (dirname.clone(), self.children_of(dirname)))
            .collect())
    }

    async fn commit_date(
        &self,
        _repository_id: i64,
        _commit: &str,
    ) -> Result<DateTime<Utc>, GitserverError> {
        Ok(self.commit_date)
    }

    async fn file_status(
        &self,
        _repository_id: i64,
        _base_commit: &str,
        _commit: &str,
    ) -> Result<HashMap<String, FileStatus>, GitserverError> {
        Ok(self.lock_status().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_children() {
        let gitserver =
            MockGitserverClient::new().with_files(["README.md", "root/a.go", "root/sub/b.go"]);

        let children = gitserver
            .directory_children(
                1,
                "c",
                &["".to_string(), "root".to_string(), "missing".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(children[""], vec!["README.md", "root"]);
        assert_eq!(children["root"], vec!["root/a.go", "root/sub"]);
        assert!(children["missing"].is_empty());
        assert_eq!(gitserver.directory_children_calls(), 1);
    }

    #[tokio::test]
    async fn test_clone_in_progress() {
        let gitserver = MockGitserverClient::new();
        gitserver.set_cloning(true);

        let err = gitserver.resolve_revision(50, "deadbeef").await.unwrap_err();
        assert!(matches!(
            err,
            GitserverError::CloneInProgress { repository_id: 50 }
        ));

        gitserver.set_cloning(false);
        gitserver.resolve_revision(50, "deadbeef").await.unwrap();
        assert_eq!(gitserver.resolve_calls(), 2);
    }
}
