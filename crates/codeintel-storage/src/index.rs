//! Secondary indexes over upload rows.
//!
//! Both indexes are written in the same `WriteBatch` as the row they
//! describe, so they never disagree with `uploads`.
//!
//! - upload_queue holds one entry per Queued, Errored or Processing row:
//!   - `q:{id:020}` for a queued row, `after = process_after`
//!   - `e:{num_failures:010}:{id:020}` for an errored row, `after = finished_at`
//!   - `p:{id:020}` for a processing row, `after = started_at`
//! - dumps_by_key holds one empty entry per Completed row:
//!   `{repository_id:020}\0{commit}\0{root}\0{indexer}\0{id:020}`
//!
//! Terminal rows have no queue entry, so dequeue never reads them.

use chrono::{DateTime, Utc};
use codeintel_types::{Upload, UploadState};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::keys::UploadKey;

pub const QUEUED_PREFIX: &[u8] = b"q:";
pub const ERRORED_PREFIX: &[u8] = b"e:";
pub const PROCESSING_PREFIX: &[u8] = b"p:";

const ID_WIDTH: usize = 20;

/// What dequeue needs to know about a row without loading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub upload_size: Option<i64>,
    /// State-specific timestamp, see the module docs
    pub after: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn fits(&self, max_size: Option<i64>) -> bool {
        match (max_size, self.upload_size) {
            (Some(max), Some(size)) => size <= max,
            _ => true,
        }
    }
}

/// Queue index key and entry of a row, or None for terminal states.
pub fn queue_entry(upload: &Upload) -> Option<(Vec<u8>, QueueEntry)> {
    let (key, after) = match upload.state {
        UploadState::Queued => (
            format!("q:{:020}", upload.id),
            upload.process_after,
        ),
        UploadState::Errored => (
            format!("e:{:010}:{:020}", upload.num_failures, upload.id),
            upload.finished_at,
        ),
        UploadState::Processing => (format!("p:{:020}", upload.id), upload.started_at),
        UploadState::Completed | UploadState::Deleted => return None,
    };

    Some((
        key.into_bytes(),
        QueueEntry {
            upload_size: upload.upload_size,
            after,
        },
    ))
}

/// Exclusive upper bound of errored entries with fewer than `max_num_retries`
/// failures.
pub fn errored_bound(max_num_retries: u32) -> Vec<u8> {
    format!("e:{:010}:", max_num_retries).into_bytes()
}

/// Prefix shared by the completed dumps holding an upload key.
pub fn dump_key_prefix(repository_id: i64, commit: &str, root: &str, indexer: &str) -> Vec<u8> {
    format!("{:020}\0{}\0{}\0{}\0", repository_id, commit, root, indexer).into_bytes()
}

/// Key-index key of a completed row, or None for any other state.
pub fn dump_key(upload: &Upload) -> Option<Vec<u8>> {
    if upload.state != UploadState::Completed {
        return None;
    }
    let mut key = dump_key_prefix(
        upload.repository_id,
        &upload.commit,
        &upload.root,
        &upload.indexer,
    );
    key.extend_from_slice(&UploadKey::new(upload.id).to_bytes());
    Some(key)
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            break;
        }
    }
    end
}

/// Upload id at the end of an index key.
pub fn id_suffix(key: &[u8]) -> Result<i64, StorageError> {
    let start = key.len().checked_sub(ID_WIDTH).ok_or_else(|| {
        StorageError::Key(format!(
            "Index key too short: {}",
            String::from_utf8_lossy(key)
        ))
    })?;
    Ok(UploadKey::from_bytes(&key[start..])?.id)
}
