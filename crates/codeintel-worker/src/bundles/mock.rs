//! In-memory raw upload store for testing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{BundleManagerClient, BundleManagerError};

#[derive(Default)]
struct Inner {
    uploads: HashMap<i64, Vec<u8>>,
    deleted: Vec<i64>,
}

/// Raw upload store backed by a map. Records deletions.
#[derive(Default)]
pub struct MockBundleManager {
    inner: Mutex<Inner>,
}

impl MockBundleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, upload_id: i64, raw: impl Into<Vec<u8>>) {
        self.lock().uploads.insert(upload_id, raw.into());
    }

    pub fn contains(&self, upload_id: i64) -> bool {
        self.lock().uploads.contains_key(&upload_id)
    }

    /// Upload ids passed to `delete_upload`, in call order.
    pub fn deleted(&self) -> Vec<i64> {
        self.lock().deleted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BundleManagerClient for MockBundleManager {
    async fn get_upload(&self, upload_id: i64) -> Result<Vec<u8>, BundleManagerError> {
        self.lock()
            .uploads
            .get(&upload_id)
            .cloned()
            .ok_or(BundleManagerError::NotFound(upload_id))
    }

    async fn delete_upload(&self, upload_id: i64) -> Result<(), BundleManagerError> {
        let mut inner = self.lock();
        inner.uploads.remove(&upload_id);
        inner.deleted.push(upload_id);
        Ok(())
    }
}
