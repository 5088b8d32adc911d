//! Digest-keyed blob storage for the vault file service.
//!
//! This crate provides:
//! - A [`BlobStore`] trait addressing blobs by their SHA-256 digest
//! - Staged uploads that become visible only once their digest is known
//! - A local filesystem backend with atomic placement

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{BlobStore, ByteStream, StreamingUpload};

use std::sync::Arc;
use vault_core::config::StorageConfig;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => Ok(Arc::new(FilesystemBackend::new(path))),
    }
}
