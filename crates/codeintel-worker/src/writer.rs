//! Persisting bundles and publishing completed dumps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use codeintel_types::{BundleData, Upload};
use tracing::{debug, info};

use crate::error::WorkerError;
use crate::store::{Store, StoreTransaction};

/// Writes bundles through [`Store`] transactions.
///
/// Every write runs inside [`PersistenceWriter::in_transaction`]: the
/// transaction commits when the body succeeds and rolls back on error. A
/// body that panics drops the transaction, which also discards it.
pub struct PersistenceWriter {
    store: Arc<dyn Store>,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Run `body` in a new transaction.
    pub async fn in_transaction<T, F>(&self, body: F) -> Result<T, WorkerError>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, WorkerError> + Send,
    {
        let mut tx = self
            .store
            .transact()
            .await
            .map_err(WorkerError::store("begin transaction"))?;

        match body(&mut *tx) {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(WorkerError::store("commit transaction"))?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Store the bundle tables of a dump, replacing any earlier attempt.
    ///
    /// Tables are written in reader order: meta, documents, result chunks,
    /// definitions, references.
    pub async fn write(&self, dump_id: i64, bundle: &BundleData) -> Result<(), WorkerError> {
        self.in_transaction(|tx| {
            tx.write_meta(dump_id, &bundle.meta)
                .map_err(WorkerError::store("write meta"))?;
            tx.write_documents(dump_id, &bundle.documents)
                .map_err(WorkerError::store("write documents"))?;
            tx.write_result_chunks(dump_id, &bundle.result_chunks)
                .map_err(WorkerError::store("write result chunks"))?;
            tx.write_definitions(dump_id, &bundle.definitions)
                .map_err(WorkerError::store("write definitions"))?;
            tx.write_references(dump_id, &bundle.references)
                .map_err(WorkerError::store("write references"))?;
            Ok(())
        })
        .await?;

        debug!(
            dump_id,
            documents = bundle.documents.len(),
            result_chunks = bundle.result_chunks.len(),
            "Wrote bundle"
        );
        Ok(())
    }

    /// Update the cross-repository tables and make the upload's dump the
    /// visible one for its key.
    ///
    /// Overlapping dumps are deleted in the same transaction that marks the
    /// upload complete, so two completed dumps never share a key.
    pub async fn publish(
        &self,
        upload: &Upload,
        bundle: &BundleData,
        committed_at: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        self.in_transaction(|tx| {
            tx.update_packages(upload.id, &bundle.packages)
                .map_err(WorkerError::store("update packages"))?;
            tx.update_package_references(upload.id, &bundle.package_references)
                .map_err(WorkerError::store("update package references"))?;
            tx.delete_overlapping_dumps(
                upload.repository_id,
                &upload.commit,
                &upload.root,
                &upload.indexer,
            )
            .map_err(WorkerError::store("delete overlapping dumps"))?;
            tx.update_committed_at(upload.id, committed_at)
                .map_err(WorkerError::store("update committed at"))?;
            tx.mark_complete(upload.id)
                .map_err(WorkerError::store("mark complete"))?;
            Ok(())
        })
        .await?;

        info!(
            upload_id = upload.id,
            repository_id = upload.repository_id,
            packages = bundle.packages.len(),
            package_references = bundle.package_references.len(),
            "Published dump"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockStore, StoreCall};
    use codeintel_types::{DocumentData, NewUpload, Package, UploadState};

    fn processing_upload(store: &MockStore) -> Upload {
        let mut upload = NewUpload {
            repository_id: 50,
            commit: "deadbeef".repeat(5),
            root: "root/".to_string(),
            indexer: "lsif-go".to_string(),
            upload_size: None,
            patch_base_id: None,
        }
        .into_upload(42, Utc::now());
        upload.state = UploadState::Processing;
        store.insert_upload(upload.clone());
        upload
    }

    fn bundle() -> BundleData {
        let mut bundle = BundleData::default();
        bundle
            .documents
            .insert("a.go".to_string(), DocumentData::default());
        bundle.packages.push(Package::new("gomod", "pkg A", "v0.1.0"));
        bundle
    }

    #[tokio::test]
    async fn test_write_order() {
        let store = MockStore::new();
        let writer = PersistenceWriter::new(Arc::new(store.clone()));

        writer.write(42, &bundle()).await.unwrap();

        let names: Vec<&str> = store.calls().iter().map(|call| call.name()).collect();
        assert_eq!(
            names,
            vec![
                "transact",
                "write_meta",
                "write_documents",
                "write_result_chunks",
                "write_definitions",
                "write_references",
                "commit",
            ]
        );
        assert_eq!(store.bundle(42).unwrap().documents.len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back() {
        let store = MockStore::new();
        store.fail_on("write_result_chunks");
        let writer = PersistenceWriter::new(Arc::new(store.clone()));

        let err = writer.write(42, &bundle()).await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to write result chunks"));

        let calls = store.calls();
        assert_eq!(calls.last(), Some(&StoreCall::Rollback { tx: 1 }));
        assert!(store.calls_named("write_definitions").is_empty());
        assert!(store.bundle(42).is_none());
    }

    #[tokio::test]
    async fn test_publish_is_one_transaction() {
        let store = MockStore::new();
        let upload = processing_upload(&store);
        let writer = PersistenceWriter::new(Arc::new(store.clone()));

        writer.publish(&upload, &bundle(), Utc::now()).await.unwrap();

        let calls = store.calls();
        let txs: Vec<Option<usize>> = calls.iter().map(|call| call.tx()).collect();
        assert!(txs.iter().all(|tx| *tx == Some(1)));

        let names: Vec<&str> = calls.iter().map(|call| call.name()).collect();
        assert_eq!(
            names,
            vec![
                "transact",
                "update_packages",
                "update_package_references",
                "delete_overlapping_dumps",
                "update_committed_at",
                "mark_complete",
                "commit",
            ]
        );
        assert_eq!(store.upload(42).unwrap().state, UploadState::Completed);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported() {
        let store = MockStore::new();
        let upload = processing_upload(&store);
        store.fail_on("commit");
        let writer = PersistenceWriter::new(Arc::new(store.clone()));

        let err = writer
            .publish(&upload, &bundle(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Store {
                operation: "commit transaction",
                ..
            }
        ));
        assert_eq!(store.upload(42).unwrap().state, UploadState::Processing);
    }
}
