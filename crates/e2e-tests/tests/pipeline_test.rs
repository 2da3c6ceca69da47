//! End-to-end pipeline tests: queue -> handler -> RocksDB.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use codeintel_types::{FileStatus, Package, UploadState};
use e2e_tests::{commit, new_upload, patch_upload, sample_upload, TestHarness, REPOSITORY_ID};

#[tokio::test]
async fn test_full_pipeline_publishes_dump() {
    let harness = TestHarness::new();
    let upload = harness.enqueue(new_upload(&commit('a')), &sample_upload()).await;

    assert_eq!(harness.drain().await, 1);

    let stored = harness.upload(upload.id);
    assert_eq!(stored.state, UploadState::Completed);
    assert!(stored.finished_at.is_some());
    assert!(stored.committed_at.is_some());
    assert_eq!(stored.failure_message, None);

    let bundle = harness.storage.read_bundle(upload.id).unwrap().unwrap();
    let mut paths: Vec<&String> = bundle.documents.keys().collect();
    paths.sort();
    assert_eq!(paths, vec!["main.go", "util.go"]);
    assert_eq!(
        bundle.resolve_result("x1"),
        vec![("main.go", "r1"), ("util.go", "r2")]
    );
    assert_eq!(bundle.definitions.len(), 1);
    assert_eq!(bundle.definitions[0].locations[0].path, "main.go");

    let mut packages = harness.storage.packages(upload.id).unwrap();
    packages.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(
        packages,
        vec![
            Package::new("gomod", "pkg A", "v0.1.0"),
            Package::new("gomod", "pkg B", "v1.2.3"),
        ]
    );

    let references = harness.storage.package_references(upload.id).unwrap();
    assert_eq!(references.len(), 1);
    let test = codeintel_bloom::decode(&references[0].filter).unwrap();
    assert!(test("ident A"));

    let dirty = harness.storage.dirty_repositories().unwrap();
    assert_eq!(dirty.get(&REPOSITORY_ID), Some(&1));

    assert!(!harness.bundles.upload_path(upload.id).exists());
}

#[tokio::test]
async fn test_files_missing_from_commit_are_pruned() {
    let harness = TestHarness::with_gitserver(
        Default::default(),
        codeintel_worker::MockGitserverClient::new().with_files(["root/main.go"]),
    );

    let upload = harness
        .enqueue(new_upload(&commit('a')), &sample_upload())
        .await;

    harness.drain().await;

    let bundle = harness.storage.read_bundle(upload.id).unwrap().unwrap();
    assert_eq!(bundle.documents.len(), 1);
    assert!(bundle.documents.contains_key("main.go"));
    // util.go is not in the commit, so its reference entry goes too
    assert_eq!(bundle.result_chunks[&0].document_paths.len(), 1);
    assert_eq!(bundle.resolve_result("x1"), vec![("main.go", "r1")]);
}

#[tokio::test]
async fn test_reupload_replaces_overlapping_dump() {
    let harness = TestHarness::new();
    let first = harness.enqueue(new_upload(&commit('a')), &sample_upload()).await;
    harness.drain().await;

    let second = harness.enqueue(new_upload(&commit('a')), &patch_upload()).await;
    harness.drain().await;

    assert_eq!(harness.upload(first.id).state, UploadState::Deleted);
    assert!(harness.storage.read_bundle(first.id).unwrap().is_none());
    assert!(harness.storage.packages(first.id).unwrap().is_empty());

    assert_eq!(harness.upload(second.id).state, UploadState::Completed);
    let bundle = harness.storage.read_bundle(second.id).unwrap().unwrap();
    assert_eq!(bundle.documents.len(), 1);

    // Both publishes bumped the dirty token
    let dirty = harness.storage.dirty_repositories().unwrap();
    assert_eq!(dirty.get(&REPOSITORY_ID), Some(&2));
}

#[tokio::test]
async fn test_other_roots_are_not_overlapping() {
    let harness = TestHarness::new();
    let first = harness.enqueue(new_upload(&commit('a')), &sample_upload()).await;

    let mut other_root = new_upload(&commit('a'));
    other_root.root = String::new();
    let mut raw = patch_upload();
    raw.documents = raw
        .documents
        .into_iter()
        .map(|(_, document)| ("README.md".to_string(), document))
        .collect();
    raw.result_chunks
        .get_mut(&0)
        .unwrap()
        .document_paths
        .insert("m".to_string(), "README.md".to_string());
    let second = harness.enqueue(other_root, &raw).await;

    assert_eq!(harness.drain().await, 2);
    assert_eq!(harness.upload(first.id).state, UploadState::Completed);
    assert_eq!(harness.upload(second.id).state, UploadState::Completed);
}

#[tokio::test]
async fn test_incremental_upload_patches_base() {
    let harness = TestHarness::new();
    let base = harness.enqueue(new_upload(&commit('a')), &sample_upload()).await;
    harness.drain().await;

    harness.gitserver.set_file_status(
        [("root/main.go".to_string(), FileStatus::Modified)]
            .into_iter()
            .collect::<HashMap<_, _>>(),
    );
    let mut incremental = new_upload(&commit('b'));
    incremental.patch_base_id = Some(base.id);
    let patched = harness.enqueue(incremental, &patch_upload()).await;
    harness.drain().await;

    assert_eq!(harness.upload(patched.id).state, UploadState::Completed);
    // Different commit, so the base dump stays visible
    assert_eq!(harness.upload(base.id).state, UploadState::Completed);

    let bundle = harness.storage.read_bundle(patched.id).unwrap().unwrap();
    let mut paths: Vec<&String> = bundle.documents.keys().collect();
    paths.sort();
    assert_eq!(paths, vec!["main.go", "util.go"]);

    let main_lines: Vec<u32> = bundle.documents["main.go"]
        .ranges
        .values()
        .map(|range| range.start_line)
        .collect();
    assert_eq!(main_lines, vec![3]);
    let util_lines: Vec<u32> = bundle.documents["util.go"]
        .ranges
        .values()
        .map(|range| range.start_line)
        .collect();
    assert_eq!(util_lines, vec![5]);

    // The moniker row of the modified file is dropped with it
    assert!(bundle
        .definitions
        .iter()
        .all(|row| row.locations.iter().all(|l| l.path != "main.go")));

    let mut names: Vec<String> = harness
        .storage
        .packages(patched.id)
        .unwrap()
        .into_iter()
        .map(|package| package.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["pkg A", "pkg B"]);

    let references = harness.storage.package_references(patched.id).unwrap();
    let test = codeintel_bloom::decode(&references[0].filter).unwrap();
    assert!(test("ident A"));
}

#[tokio::test]
async fn test_clone_in_progress_defers_upload() {
    let harness = TestHarness::new();
    harness.gitserver.set_cloning(true);
    let upload = harness.enqueue(new_upload(&commit('a')), &sample_upload()).await;

    let before = Utc::now();
    assert_eq!(harness.drain().await, 1);

    let stored = harness.upload(upload.id);
    assert_eq!(stored.state, UploadState::Queued);
    assert_eq!(stored.num_failures, 0);
    assert_eq!(stored.num_resets, 0);
    assert!(stored.process_after.unwrap() >= before + Duration::seconds(60));
    assert!(harness.storage.read_bundle(upload.id).unwrap().is_none());
    assert!(harness.bundles.upload_path(upload.id).exists());

    // Not eligible again until the delay has passed
    harness.gitserver.set_cloning(false);
    assert_eq!(harness.drain().await, 0);
}
