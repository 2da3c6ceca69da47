//! Raw upload storage.
//!
//! Raw uploads are kept until the upload that produced them is completed, so
//! a failed attempt can be retried from the same bytes.

mod fs;
mod mock;

pub use fs::FsBundleManager;
pub use mock::MockBundleManager;

use async_trait::async_trait;
use thiserror::Error;

/// Error type for raw upload storage.
#[derive(Debug, Error)]
pub enum BundleManagerError {
    #[error("Raw upload {0} not found")]
    NotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object store holding raw uploads by upload id.
#[async_trait]
pub trait BundleManagerClient: Send + Sync {
    /// Uncompressed bytes of the raw upload.
    async fn get_upload(&self, upload_id: i64) -> Result<Vec<u8>, BundleManagerError>;

    /// Remove the raw upload. Removing a missing upload succeeds.
    async fn delete_upload(&self, upload_id: i64) -> Result<(), BundleManagerError>;
}
