//! Worker pool tests: byte budget under concurrency and the poll loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use codeintel_types::{
    DocumentData, FileStatus, NewUpload, RangeData, UploadState, WorkerSettings,
};
use codeintel_worker::{
    GitserverClient, GitserverError, Handler, JsonCorrelator, MockBundleManager,
    MockGitserverClient, MockStore, RawBundle, Worker,
};

const NUM_UPLOADS: i64 = 24;
const BUDGET: i64 = 100;

/// Gitserver that is slow to resolve commits, so handlers overlap.
struct SlowGitserver {
    inner: MockGitserverClient,
    delay: Duration,
}

#[async_trait]
impl GitserverClient for SlowGitserver {
    async fn resolve_revision(&self, repository_id: i64, commit: &str) -> Result<(), GitserverError> {
        tokio::time::sleep(self.delay).await;
        self.inner.resolve_revision(repository_id, commit).await
    }

    async fn directory_children(
        &self,
        repository_id: i64,
        commit: &str,
        dirnames: &[String],
    ) -> Result<HashMap<String, Vec<String>>, GitserverError> {
        self.inner
            .directory_children(repository_id, commit, dirnames)
            .await
    }

    async fn commit_date(
        &self,
        repository_id: i64,
        commit: &str,
    ) -> Result<DateTime<Utc>, GitserverError> {
        self.inner.commit_date(repository_id, commit).await
    }

    async fn file_status(
        &self,
        repository_id: i64,
        base_commit: &str,
        commit: &str,
    ) -> Result<HashMap<String, FileStatus>, GitserverError> {
        self.inner
            .file_status(repository_id, base_commit, commit)
            .await
    }
}

fn raw_upload() -> Vec<u8> {
    let mut document = DocumentData::default();
    document
        .ranges
        .insert("r1".to_string(), RangeData::new(0, 0, 0, 4));
    let raw = RawBundle {
        documents: [("main.go".to_string(), document)].into_iter().collect(),
        ..Default::default()
    };
    serde_json::to_vec(&raw).unwrap()
}

fn upload_size(id: i64) -> i64 {
    10 + (id * 7) % 50
}

struct Pool {
    store: MockStore,
    bundles: Arc<MockBundleManager>,
    worker: Arc<Worker>,
}

fn pool(settings: WorkerSettings) -> Pool {
    let store = MockStore::new();
    let bundles = Arc::new(MockBundleManager::new());

    for id in 1..=NUM_UPLOADS {
        let upload = NewUpload {
            repository_id: 1,
            commit: format!("{:040x}", id),
            root: String::new(),
            indexer: "lsif-go".to_string(),
            upload_size: Some(upload_size(id)),
            patch_base_id: None,
        }
        .into_upload(id, Utc::now());
        store.insert_upload(upload);
        bundles.insert(id, raw_upload());
    }

    let gitserver = SlowGitserver {
        inner: MockGitserverClient::new().with_files(["main.go"]),
        delay: Duration::from_millis(5),
    };
    let handler = Handler::new(
        Arc::new(store.clone()),
        bundles.clone(),
        Arc::new(gitserver),
        Arc::new(JsonCorrelator::new()),
    );
    let worker = Arc::new(Worker::new(Arc::new(store.clone()), handler, settings));

    Pool {
        store,
        bundles,
        worker,
    }
}

fn completed(store: &MockStore) -> i64 {
    (1..=NUM_UPLOADS)
        .filter(|id| store.upload(*id).map(|u| u.state) == Some(UploadState::Completed))
        .count() as i64
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_budget_never_overcommits() {
    let pool = pool(WorkerSettings {
        maximum_upload_bytes: BUDGET,
        ..Default::default()
    });

    let done = Arc::new(AtomicBool::new(false));
    let lowest = Arc::new(AtomicI64::new(BUDGET));
    let sampler = {
        let worker = Arc::clone(&pool.worker);
        let done = Arc::clone(&done);
        let lowest = Arc::clone(&lowest);
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let remaining = worker.budget().remaining();
                assert!(remaining <= BUDGET);
                lowest.fetch_min(remaining, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        })
    };

    let token = CancellationToken::new();
    let handlers = (0..8).map(|_| {
        let worker = Arc::clone(&pool.worker);
        let store = pool.store.clone();
        let token = token.clone();
        tokio::spawn(async move {
            while completed(&store) < NUM_UPLOADS {
                if !worker.dequeue_and_handle(&token).await.unwrap() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        })
    });
    for result in futures::future::join_all(handlers).await {
        result.unwrap();
    }

    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert!(lowest.load(Ordering::SeqCst) >= 0);
    assert!(lowest.load(Ordering::SeqCst) < BUDGET);
    assert_eq!(pool.worker.budget().remaining(), BUDGET);
    assert_eq!(pool.bundles.deleted().len(), NUM_UPLOADS as usize);

    // Every claim asked for at most what was left
    for call in pool.store.calls_named("dequeue") {
        if let codeintel_worker::StoreCall::Dequeue { max_size } = call {
            let max_size = max_size.unwrap();
            assert!((0..=BUDGET).contains(&max_size));
        }
    }
}

#[tokio::test]
async fn test_disabled_budget_dequeues_without_limit() {
    let pool = pool(WorkerSettings::default());
    let token = CancellationToken::new();

    assert!(pool.worker.dequeue_and_handle(&token).await.unwrap());
    assert_eq!(
        pool.store.calls_named("dequeue"),
        vec![codeintel_worker::StoreCall::Dequeue { max_size: None }]
    );
}

#[tokio::test]
async fn test_empty_queue_reports_no_work() {
    let store = MockStore::new();
    let handler = Handler::new(
        Arc::new(store.clone()),
        Arc::new(MockBundleManager::new()),
        Arc::new(MockGitserverClient::new()),
        Arc::new(JsonCorrelator::new()),
    );
    let worker = Worker::new(Arc::new(store), handler, WorkerSettings::default());

    assert!(!worker
        .dequeue_and_handle(&CancellationToken::new())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_dequeue_failure_is_returned() {
    let pool = pool(WorkerSettings::default());
    pool.store.fail_on("dequeue");

    let err = pool
        .worker
        .dequeue_and_handle(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Failed to dequeue upload"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_drains_queue_and_stops_on_cancel() {
    let pool = pool(WorkerSettings {
        poll_interval_ms: 10,
        num_handlers: 3,
        maximum_upload_bytes: BUDGET,
        ..Default::default()
    });

    let token = CancellationToken::new();
    let running = tokio::spawn(Arc::clone(&pool.worker).run(token.clone()));

    tokio::time::timeout(Duration::from_secs(10), async {
        while completed(&pool.store) < NUM_UPLOADS {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pool.worker.budget().remaining(), BUDGET);
}
