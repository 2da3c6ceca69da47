//! HTTP gitserver client.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use codeintel_types::FileStatus;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{GitserverClient, GitserverError};

/// Configuration for [`HttpGitserverClient`].
#[derive(Debug, Clone)]
pub struct HttpGitserverConfig {
    /// Base URL, e.g. `http://gitserver:3178`
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Attempts per request, including the first
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_retry_interval: Duration,
}

impl HttpGitserverConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_retry_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveResponse {
    #[serde(default)]
    clone_in_progress: bool,
}

#[derive(Serialize)]
struct DirectoryChildrenRequest<'a> {
    dirnames: &'a [String],
}

#[derive(Deserialize)]
struct DirectoryChildrenResponse {
    children: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitDateResponse {
    committed_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct FileStatusResponse {
    files: HashMap<String, FileStatus>,
}

/// Gitserver client speaking JSON over HTTP.
pub struct HttpGitserverClient {
    client: Client,
    config: HttpGitserverConfig,
}

impl HttpGitserverClient {
    pub fn new(config: HttpGitserverConfig) -> Result<Self, GitserverError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GitserverError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn commit_url(&self, repository_id: i64, commit: &str) -> String {
        format!(
            "{}/repositories/{}/commits/{}",
            self.config.base_url, repository_id, commit
        )
    }

    /// Run `request` until it succeeds, fails permanently, or retries run out.
    async fn with_retry<T, F, Fut>(&self, operation: &str, request: F) -> Result<T, GitserverError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GitserverError>>,
    {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.initial_retry_interval,
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(operation, attempt = attempts, "Calling gitserver");

            match request().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempts >= self.config.max_retries {
                        error!(operation, error = %e, "Max retries exceeded");
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                operation,
                                error = %e,
                                retry_in_ms = duration.as_millis(),
                                "Gitserver request failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(operation, error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

/// Map a response status to an error, leaving 2xx responses to the caller.
fn check_status(response: Response, repository_id: i64) -> Result<Response, GitserverError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::CONFLICT {
        return Err(GitserverError::CloneInProgress { repository_id });
    }
    if status.is_server_error() {
        return Err(GitserverError::Request(format!("Status {}", status)));
    }
    Err(GitserverError::InvalidResponse(format!(
        "Unexpected status {}",
        status
    )))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GitserverError> {
    response
        .json()
        .await
        .map_err(|e| GitserverError::InvalidResponse(e.to_string()))
}

fn request_error(e: reqwest::Error) -> GitserverError {
    GitserverError::Request(e.to_string())
}

#[async_trait]
impl GitserverClient for HttpGitserverClient {
    async fn resolve_revision(
        &self,
        repository_id: i64,
        commit: &str,
    ) -> Result<(), GitserverError> {
        let url = self.commit_url(repository_id, commit);
        let url = url.as_str();
        self.with_retry("resolve revision", move || async move {
            let response = self.client.get(url).send().await.map_err(request_error)?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(GitserverError::RevisionNotFound {
                    repository_id,
                    commit: commit.to_string(),
                });
            }

            let body: ResolveResponse = decode(check_status(response, repository_id)?).await?;
            if body.clone_in_progress {
                return Err(GitserverError::CloneInProgress { repository_id });
            }
            Ok(())
        })
        .await
    }

    async fn directory_children(
        &self,
        repository_id: i64,
        commit: &str,
        dirnames: &[String],
    ) -> Result<HashMap<String, Vec<String>>, GitserverError> {
        let url = format!("{}/directory-children", self.commit_url(repository_id, commit));
        let url = url.as_str();
        self.with_retry("directory children", move || async move {
            let response = self
                .client
                .post(url)
                .json(&DirectoryChildrenRequest { dirnames })
                .send()
                .await
                .map_err(request_error)?;

            let body: DirectoryChildrenResponse =
                decode(check_status(response, repository_id)?).await?;
            Ok(body.children)
        })
        .await
    }

    async fn commit_date(
        &self,
        repository_id: i64,
        commit: &str,
    ) -> Result<DateTime<Utc>, GitserverError> {
        let url = format!("{}/commit-date", self.commit_url(repository_id, commit));
        let url = url.as_str();
        self.with_retry("commit date", move || async move {
            let response = self.client.get(url).send().await.map_err(request_error)?;
            let body: CommitDateResponse = decode(check_status(response, repository_id)?).await?;
            Ok(body.committed_at)
        })
        .await
    }

    async fn file_status(
        &self,
        repository_id: i64,
        base_commit: &str,
        commit: &str,
    ) -> Result<HashMap<String, FileStatus>, GitserverError> {
        let url = format!(
            "{}/repositories/{}/file-status",
            self.config.base_url, repository_id
        );
        let url = url.as_str();
        self.with_retry("file status", move || async move {
            let response = self
                .client
                .get(url)
                .query(&[("base", base_commit), ("commit", commit)])
                .send()
                .await
                .map_err(request_error)?;

            let body: FileStatusResponse = decode(check_status(response, repository_id)?).await?;
            Ok(body.files)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = HttpGitserverConfig::new("http://gitserver:3178/");
        assert_eq!(config.base_url, "http://gitserver:3178");
    }

    #[test]
    fn test_commit_url() {
        let client = HttpGitserverClient::new(HttpGitserverConfig::new("http://gs")).unwrap();
        assert_eq!(
            client.commit_url(50, "deadbeef"),
            "http://gs/repositories/50/commits/deadbeef"
        );
    }

    #[test]
    fn test_only_request_errors_are_transient() {
        assert!(GitserverError::Request("reset".into()).is_transient());
        assert!(!GitserverError::CloneInProgress { repository_id: 1 }.is_transient());
        assert!(!GitserverError::InvalidResponse("bad".into()).is_transient());
    }
}
