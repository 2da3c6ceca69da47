//! Raw uploads stored as gzip files in a directory.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use super::{BundleManagerClient, BundleManagerError};

/// Keeps each raw upload at `{dir}/{id}.lsif.gz`.
pub struct FsBundleManager {
    dir: PathBuf,
}

impl FsBundleManager {
    /// Use `dir`, creating it if necessary.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, BundleManagerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn upload_path(&self, upload_id: i64) -> PathBuf {
        self.dir.join(format!("{}.lsif.gz", upload_id))
    }

    /// Store raw upload bytes, compressing them.
    pub async fn put_upload(&self, upload_id: i64, raw: &[u8]) -> Result<(), BundleManagerError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw)?;
        let compressed = encoder.finish()?;

        write_atomically(&self.upload_path(upload_id), &compressed).await?;
        debug!(
            upload_id,
            raw_bytes = raw.len(),
            stored_bytes = compressed.len(),
            "Stored raw upload"
        );
        Ok(())
    }
}

/// Write through a temporary sibling so readers never see a partial file.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), BundleManagerError> {
    let tmp = path.with_extension("gz.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl BundleManagerClient for FsBundleManager {
    async fn get_upload(&self, upload_id: i64) -> Result<Vec<u8>, BundleManagerError> {
        let compressed = match tokio::fs::read(self.upload_path(upload_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BundleManagerError::NotFound(upload_id))
            }
            Err(e) => return Err(e.into()),
        };

        let mut raw = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;
        Ok(raw)
    }

    async fn delete_upload(&self, upload_id: i64) -> Result<(), BundleManagerError> {
        match tokio::fs::remove_file(self.upload_path(upload_id)).await {
            Ok(()) => {
                debug!(upload_id, "Deleted raw upload");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let temp_dir = TempDir::new().unwrap();
        let manager = FsBundleManager::new(temp_dir.path().join("uploads")).unwrap();

        manager.put_upload(7, b"{\"documents\":{}}").await.unwrap();
        assert!(manager.upload_path(7).exists());
        assert_eq!(manager.get_upload(7).await.unwrap(), b"{\"documents\":{}}");

        manager.delete_upload(7).await.unwrap();
        assert!(!manager.upload_path(7).exists());
        // Deleting twice is fine
        manager.delete_upload(7).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_upload() {
        let temp_dir = TempDir::new().unwrap();
        let manager = FsBundleManager::new(temp_dir.path()).unwrap();

        let err = manager.get_upload(99).await.unwrap_err();
        assert!(matches!(err, BundleManagerError::NotFound(99)));
    }

    #[tokio::test]
    async fn test_corrupt_upload_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = FsBundleManager::new(temp_dir.path()).unwrap();
        std::fs::write(manager.upload_path(3), b"not gzip").unwrap();

        let err = manager.get_upload(3).await.unwrap_err();
        assert!(matches!(err, BundleManagerError::Io(_)));
    }
}
