//! HTTP gitserver client against a mock server.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use codeintel_types::FileStatus;
use codeintel_worker::{GitserverClient, GitserverError, HttpGitserverClient, HttpGitserverConfig};

const COMMIT: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

fn client(server: &MockServer) -> HttpGitserverClient {
    let mut config = HttpGitserverConfig::new(server.uri());
    config.initial_retry_interval = Duration::from_millis(10);
    config.timeout = Duration::from_secs(5);
    HttpGitserverClient::new(config).unwrap()
}

fn commit_path() -> String {
    format!("/repositories/50/commits/{}", COMMIT)
}

#[tokio::test]
async fn test_resolve_revision() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(commit_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cloneInProgress": false})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).resolve_revision(50, COMMIT).await.unwrap();
}

#[tokio::test]
async fn test_resolve_revision_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(commit_path()))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .resolve_revision(50, COMMIT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GitserverError::RevisionNotFound {
            repository_id: 50,
            ..
        }
    ));
}

#[tokio::test]
async fn test_clone_in_progress_from_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(commit_path()))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .resolve_revision(50, COMMIT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GitserverError::CloneInProgress { repository_id: 50 }
    ));
}

#[tokio::test]
async fn test_clone_in_progress_from_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(commit_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cloneInProgress": true})))
        .mount(&server)
        .await;

    let err = client(&server)
        .resolve_revision(50, COMMIT)
        .await
        .unwrap_err();
    assert!(matches!(err, GitserverError::CloneInProgress { .. }));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(commit_path()))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(commit_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).resolve_revision(50, COMMIT).await.unwrap();
}

#[tokio::test]
async fn test_retries_give_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(commit_path()))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server)
        .resolve_revision(50, COMMIT)
        .await
        .unwrap_err();
    assert!(matches!(err, GitserverError::Request(_)));
}

#[tokio::test]
async fn test_directory_children() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/directory-children", commit_path())))
        .and(body_json(json!({"dirnames": ["", "root"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "children": {
                "": ["root", "README.md"],
                "root": ["root/main.go"],
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let children = client(&server)
        .directory_children(50, COMMIT, &["".to_string(), "root".to_string()])
        .await
        .unwrap();
    assert_eq!(children["root"], vec!["root/main.go".to_string()]);
    assert_eq!(children[""].len(), 2);
}

#[tokio::test]
async fn test_commit_date() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/commit-date", commit_path())))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"committedAt": "2021-03-04T05:06:07Z"})),
        )
        .mount(&server)
        .await;

    let date = client(&server).commit_date(50, COMMIT).await.unwrap();
    assert_eq!(date, Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap());
}

#[tokio::test]
async fn test_malformed_body_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/commit-date", commit_path())))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).commit_date(50, COMMIT).await.unwrap_err();
    assert!(matches!(err, GitserverError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_file_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories/50/file-status"))
        .and(query_param("base", "cafebabe"))
        .and(query_param("commit", COMMIT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": {
                "root/a.go": "modified",
                "root/b.go": "added",
                "root/c.go": "deleted",
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let status = client(&server)
        .file_status(50, "cafebabe", COMMIT)
        .await
        .unwrap();
    assert_eq!(status.len(), 3);
    assert_eq!(status["root/a.go"], FileStatus::Modified);
    assert_eq!(status["root/b.go"], FileStatus::Added);
    assert_eq!(status["root/c.go"], FileStatus::Deleted);
}
