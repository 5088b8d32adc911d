//! Local filesystem storage backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! blobs/<hex[0..2]>/<hex[2..4]>/<hex>   finished blobs, one per digest
//! staging/<uuid>                        in-flight uploads
//! ```
//!
//! Staging lives under the same root so placing a blob is a rename on one
//! filesystem, which is atomic.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, ByteStream, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;
use vault_core::ContentHash;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Directory under the root holding in-flight uploads.
const STAGING_DIR: &str = "staging";

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    ///
    /// The root directory is not touched until the first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &ContentHash) -> PathBuf {
        self.root.join(digest.blob_key())
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Create a uniquely named staging file.
    async fn create_staging_file(&self) -> StorageResult<(fs::File, PathBuf)> {
        let dir = self.staging_dir();
        fs::create_dir_all(&dir).await?;
        let path = dir.join(Uuid::new_v4().to_string());
        let file = fs::File::create(&path).await?;
        Ok((file, path))
    }
}

/// Ensure parent directory exists.
async fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, digest: &ContentHash) -> StorageResult<bool> {
        fs::try_exists(self.blob_path(digest))
            .await
            .map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, digest: &ContentHash) -> StorageResult<Bytes> {
        let data = fs::read(self.blob_path(digest))
            .await
            .map_err(|e| StorageError::from_io(e, &digest.to_hex()))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, digest: &ContentHash) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let file = fs::File::open(self.blob_path(digest))
            .await
            .map_err(|e| StorageError::from_io(e, &digest.to_hex()))?;

        // Stream the file in chunks instead of loading entirely into memory
        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, digest: &ContentHash, data: Bytes) -> StorageResult<()> {
        let actual = ContentHash::compute(&data);
        if actual != *digest {
            return Err(StorageError::HashMismatch {
                expected: digest.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let mut upload = self.put_stream().await?;
        if let Err(e) = upload.write(data).await {
            let _ = upload.abort().await;
            return Err(e);
        }
        upload.finish(digest).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self) -> StorageResult<Box<dyn StreamingUpload>> {
        let (file, temp_path) = self.create_staging_file().await?;

        Ok(Box::new(FilesystemUpload {
            file: Some(file),
            temp_path,
            root: self.root.clone(),
            bytes_written: 0,
            settled: false,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, digest: &ContentHash) -> StorageResult<()> {
        fs::remove_file(self.blob_path(digest))
            .await
            .map_err(|e| StorageError::from_io(e, &digest.to_hex()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn sweep_staging(&self) -> StorageResult<u64> {
        let dir = self.staging_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            // Use file_type() instead of path.is_file() to avoid following symlinks.
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }

        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        // A root that does not exist yet is fine; it is created on first write.
        let metadata = match fs::metadata(&self.root).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::Io(std::io::Error::new(
                    e.kind(),
                    format!("storage root not accessible: {e}"),
                )));
            }
        };

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload for filesystem backend.
struct FilesystemUpload {
    file: Option<fs::File>,
    temp_path: PathBuf,
    root: PathBuf,
    bytes_written: u64,
    /// Set once the staged file has been renamed into place or removed.
    settled: bool,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            StorageError::Io(std::io::Error::other("write after upload was closed"))
        })?;
        file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    async fn finish(mut self: Box<Self>, digest: &ContentHash) -> StorageResult<u64> {
        let file = self.file.take().ok_or_else(|| {
            StorageError::Io(std::io::Error::other("upload already closed"))
        })?;
        // Ensure all data is flushed to disk before rename
        file.sync_all().await?;
        drop(file);

        let final_path = self.root.join(digest.blob_key());
        ensure_parent(&final_path).await?;
        fs::rename(&self.temp_path, &final_path).await?;
        self.settled = true;

        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        drop(self.file.take());
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        self.settled = true;
        Ok(())
    }
}

impl Drop for FilesystemUpload {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Upload future was cancelled mid-flight. Remove the staged file off
        // the current task; the startup sweep covers runtime shutdown.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let path = self.temp_path.clone();
            handle.spawn(async move {
                if let Err(e) = fs::remove_file(&path).await
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::debug!(path = %path.display(), error = %e, "Failed to discard staged upload");
                }
            });
        }
    }
}
