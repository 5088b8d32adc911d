//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use vault_core::ContentHash;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Blob store abstraction for content-addressed storage.
///
/// Every blob is keyed by the SHA-256 digest of its bytes. At most one
/// physical copy exists per digest; writing the same digest twice is
/// idempotent.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Check if a blob exists.
    async fn exists(&self, digest: &ContentHash) -> StorageResult<bool>;

    /// Get a blob's content.
    async fn get(&self, digest: &ContentHash) -> StorageResult<Bytes>;

    /// Get a blob as a byte stream.
    async fn get_stream(&self, digest: &ContentHash) -> StorageResult<ByteStream>;

    /// Put a blob atomically. The bytes must hash to `digest`.
    async fn put(&self, digest: &ContentHash, data: Bytes) -> StorageResult<()>;

    /// Start a staged upload whose digest is not known yet.
    ///
    /// Nothing becomes visible under a digest until
    /// [`StreamingUpload::finish`] succeeds.
    async fn put_stream(&self) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete a blob. A missing blob reports `NotFound`.
    async fn delete(&self, digest: &ContentHash) -> StorageResult<()>;

    /// Remove staged uploads left behind by aborted or crashed writers.
    ///
    /// Must only run while no uploads are in flight (e.g. at startup).
    /// Returns the number of staged objects removed.
    async fn sweep_staging(&self) -> StorageResult<u64>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend accessibility.
    ///
    /// Should be called during server startup so misconfiguration is caught
    /// before requests are accepted.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// A staged upload.
///
/// Dropping an upload without calling `finish` or `abort` discards the
/// staged bytes on a best-effort basis; `sweep_staging` catches the rest.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Total bytes written so far.
    fn bytes_written(&self) -> u64;

    /// Durably place the staged bytes under `digest` and return the total
    /// bytes written. If a blob already exists for `digest` it is replaced
    /// atomically by identical content.
    async fn finish(self: Box<Self>, digest: &ContentHash) -> StorageResult<u64>;

    /// Abort the upload and discard staged bytes.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
