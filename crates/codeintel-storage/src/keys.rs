//! Key encoding and decoding for storage layer.
//!
//! Numeric ids are zero-padded to 20 digits so keys sort numerically.
//! - upload rows: `{upload_id:020}`
//! - dump rows: `{dump_id:020}:{suffix}`
//! - dirty tokens: `{repository_id:020}`

use crate::error::StorageError;

/// Key of an upload row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadKey {
    pub id: i64,
}

impl UploadKey {
    pub fn new(id: i64) -> Self {
        Self { id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{:020}", self.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let id: i64 = s
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid upload key {}: {}", s, e)))?;
        Ok(Self { id })
    }
}

/// Keys of rows owned by a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpKey {
    pub dump_id: i64,
}

impl DumpKey {
    pub fn new(dump_id: i64) -> Self {
        Self { dump_id }
    }

    /// Prefix shared by every row of this dump
    pub fn prefix(&self) -> Vec<u8> {
        format!("{:020}:", self.dump_id).into_bytes()
    }

    /// Exclusive upper bound of this dump's rows (`;` sorts after `:`)
    pub fn prefix_end(&self) -> Vec<u8> {
        format!("{:020};", self.dump_id).into_bytes()
    }

    /// Single-row key (meta)
    pub fn row(&self) -> Vec<u8> {
        self.prefix()
    }

    /// Row keyed by a string, e.g. a document path
    pub fn named(&self, name: &str) -> Vec<u8> {
        format!("{:020}:{}", self.dump_id, name).into_bytes()
    }

    /// Row keyed by position, for ordered tables
    pub fn indexed(&self, index: usize) -> Vec<u8> {
        format!("{:020}:{:010}", self.dump_id, index).into_bytes()
    }

    /// Strip the dump prefix from a row key
    pub fn suffix<'a>(&self, key: &'a [u8]) -> Result<&'a str, StorageError> {
        let prefix = self.prefix();
        let rest = key.strip_prefix(prefix.as_slice()).ok_or_else(|| {
            StorageError::Key(format!(
                "Key {} does not belong to dump {}",
                String::from_utf8_lossy(key),
                self.dump_id
            ))
        })?;
        std::str::from_utf8(rest).map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))
    }
}

/// Key of a repository's dirty token
pub fn repository_key(repository_id: i64) -> Vec<u8> {
    format!("{:020}", repository_id).into_bytes()
}
