//! End-to-end test infrastructure for the code-intelligence worker.
//!
//! Provides a shared TestHarness wiring the real RocksDB store and the
//! filesystem raw-upload store to a mock gitserver, plus fixture builders
//! for JSON uploads.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use codeintel_storage::Storage;
use codeintel_types::{
    DocumentData, DocumentIdRangeId, Location, MonikerLocations, NewUpload, Package, RangeData,
    ResultChunkData, Upload, WorkerSettings,
};
use codeintel_worker::{
    FsBundleManager, Handler, JsonCorrelator, MockGitserverClient, RawBundle, RawPackageReference,
    Worker,
};

pub const REPOSITORY_ID: i64 = 50;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub bundles: Arc<FsBundleManager>,
    pub gitserver: Arc<MockGitserverClient>,
    pub worker: Worker,
}

impl TestHarness {
    /// Harness with a single handler, no byte budget and immediate retries.
    pub fn new() -> Self {
        Self::with_settings(WorkerSettings {
            num_handlers: 1,
            retry_after_secs: 0,
            ..Default::default()
        })
    }

    pub fn with_settings(settings: WorkerSettings) -> Self {
        Self::with_gitserver(
            settings,
            MockGitserverClient::new().with_files(["root/main.go", "root/util.go", "README.md"]),
        )
    }

    pub fn with_gitserver(settings: WorkerSettings, gitserver: MockGitserverClient) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"),
        );
        let bundles = Arc::new(
            FsBundleManager::new(temp_dir.path().join("uploads"))
                .expect("Failed to create upload dir"),
        );
        let gitserver = Arc::new(gitserver);

        let store = Arc::new(Arc::clone(&storage));
        let handler = Handler::new(
            store.clone(),
            bundles.clone(),
            gitserver.clone(),
            Arc::new(JsonCorrelator::new()),
        );
        let worker = Worker::new(store, handler, settings);

        Self {
            _temp_dir: temp_dir,
            storage,
            bundles,
            gitserver,
            worker,
        }
    }

    /// Store a raw upload and queue it.
    pub async fn enqueue(&self, new_upload: NewUpload, raw: &RawBundle) -> Upload {
        let bytes = serde_json::to_vec(raw).expect("Failed to serialize upload");
        let upload = self
            .storage
            .insert_upload(new_upload, Utc::now())
            .expect("Failed to insert upload");
        self.bundles
            .put_upload(upload.id, &bytes)
            .await
            .expect("Failed to store raw upload");
        upload
    }

    /// Handle uploads until none is eligible. Returns how many were claimed.
    pub async fn drain(&self) -> usize {
        let token = CancellationToken::new();
        let mut claimed = 0;
        while self
            .worker
            .dequeue_and_handle(&token)
            .await
            .expect("Failed to dequeue")
        {
            claimed += 1;
        }
        claimed
    }

    pub fn upload(&self, id: i64) -> Upload {
        self.storage
            .get_upload(id)
            .expect("Failed to read upload")
            .expect("Upload missing")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Upload metadata for `commit` under the `root/` directory.
pub fn new_upload(commit: &str) -> NewUpload {
    NewUpload {
        repository_id: REPOSITORY_ID,
        commit: commit.to_string(),
        root: "root/".to_string(),
        indexer: "lsif-go".to_string(),
        upload_size: None,
        patch_base_id: None,
    }
}

pub fn commit(seed: char) -> String {
    std::iter::repeat(seed).take(40).collect()
}

/// A document whose ranges point at the given definition and reference
/// results, one range per `(range id, line)`.
pub fn document(ranges: &[(&str, u32)], definition: &str, reference: &str) -> DocumentData {
    let mut document = DocumentData::default();
    for (id, line) in ranges {
        document.ranges.insert(
            id.to_string(),
            RangeData::new(*line, 0, *line, 4)
                .with_definition_result(definition)
                .with_reference_result(reference),
        );
    }
    document
}

/// Two Go files under `root/`: `main.go` defines `Func` and `util.go`
/// calls it. Exports `pkg A` and `pkg B`, and uses `ident A` from `pkg A`.
pub fn sample_upload() -> RawBundle {
    let mut chunk = ResultChunkData::default();
    chunk
        .document_paths
        .insert("m".to_string(), "root/main.go".to_string());
    chunk
        .document_paths
        .insert("u".to_string(), "root/util.go".to_string());
    chunk
        .document_id_range_ids
        .insert("d1".to_string(), vec![DocumentIdRangeId::new("m", "r1")]);
    chunk.document_id_range_ids.insert(
        "x1".to_string(),
        vec![
            DocumentIdRangeId::new("m", "r1"),
            DocumentIdRangeId::new("u", "r2"),
        ],
    );

    RawBundle {
        documents: [
            ("root/main.go".to_string(), document(&[("r1", 1)], "d1", "x1")),
            ("root/util.go".to_string(), document(&[("r2", 5)], "d1", "x1")),
        ]
        .into_iter()
        .collect(),
        result_chunks: [(0, chunk)].into_iter().collect(),
        definitions: vec![MonikerLocations {
            scheme: "gomod".to_string(),
            identifier: "pkg A:Func".to_string(),
            locations: vec![Location {
                path: "root/main.go".to_string(),
                start_line: 1,
                start_character: 0,
                end_line: 1,
                end_character: 4,
            }],
        }],
        packages: vec![
            Package::new("gomod", "pkg A", "v0.1.0"),
            Package::new("gomod", "pkg B", "v1.2.3"),
        ],
        package_references: vec![RawPackageReference {
            scheme: "gomod".to_string(),
            name: "pkg A".to_string(),
            version: "v0.1.0".to_string(),
            identifiers: vec!["ident A".to_string()],
        }],
        ..Default::default()
    }
}

/// Re-index of `main.go` alone, with `Func` moved to line 3.
pub fn patch_upload() -> RawBundle {
    let mut chunk = ResultChunkData::default();
    chunk
        .document_paths
        .insert("m".to_string(), "root/main.go".to_string());
    chunk
        .document_id_range_ids
        .insert("d9".to_string(), vec![DocumentIdRangeId::new("m", "p1")]);
    chunk
        .document_id_range_ids
        .insert("x9".to_string(), vec![DocumentIdRangeId::new("m", "p1")]);

    RawBundle {
        documents: [("root/main.go".to_string(), document(&[("p1", 3)], "d9", "x9"))]
            .into_iter()
            .collect(),
        result_chunks: [(0, chunk)].into_iter().collect(),
        packages: vec![Package::new("gomod", "pkg A", "v0.1.0")],
        ..Default::default()
    }
}
