//! Deduplicating upload and reference-counted delete.
//!
//! Every distinct content digest has exactly one blob and one file record.
//! An upload of content that already exists adds a reference instead of a
//! copy; a delete drops one reference, and the last one takes the record and
//! the blob with it.
//!
//! Concurrency for a digest is handled twice: [`DigestLocks`] serialises the
//! check-then-act sequences inside this process, and the metadata store's
//! unique digest constraint catches writers outside it. A lost insert race is
//! turned into a reference increment and never reported to the caller.

use crate::locks::DigestLocks;
use crate::metrics;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::Instrument;
use vault_core::{AccessPolicy, ContentHash, ContentHasher, FileId, FileRecord, FileSearch, Identity};
use vault_metadata::{FileRow, MetadataError, MetadataStore, ReleaseOutcome};
use vault_storage::{BlobStore, ByteStream, StorageError, StreamingUpload};

/// How many times a lost digest insert race is retried as an increment.
const MAX_DIGEST_CONFLICT_RETRIES: usize = 3;

/// Engine error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage failure: {0}")]
    StorageIo(#[from] StorageError),

    #[error("metadata failure: {0}")]
    Metadata(#[from] MetadataError),
}

impl EngineError {
    /// Short label used for metrics and per-file upload results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::StorageIo(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Whether an upload stored new content or referenced existing content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadDisposition {
    Created,
    Deduplicated,
}

impl UploadDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deduplicated => "deduplicated",
        }
    }
}

/// Result of committing one uploaded file.
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    /// The record now holding the content. For a duplicate this is the
    /// existing record, owned by its first uploader.
    pub record: FileRecord,
    pub disposition: UploadDisposition,
}

/// Whether a delete dropped a reference or removed the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    Dereferenced,
    Deleted,
}

impl DeleteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dereferenced => "dereferenced",
            Self::Deleted => "deleted",
        }
    }
}

/// Result of a delete request.
#[derive(Clone, Debug)]
pub struct DeleteOutcome {
    pub id: FileId,
    pub status: DeleteStatus,
    /// References left after this delete; zero once the record is gone.
    pub reference_count: u64,
}

/// Who is downloading, for metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadKind {
    Owner,
    Public,
}

impl DownloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Public => "public",
        }
    }
}

/// A staged upload whose bytes are hashed as they are written.
///
/// This is the single pass over the content: the staged copy is what gets
/// placed under the digest on commit. Dropping it discards the staged bytes.
pub struct HashingUpload {
    upload: Box<dyn StreamingUpload>,
    hasher: ContentHasher,
}

impl HashingUpload {
    /// Feed one chunk to both the hasher and the staged upload.
    pub async fn write(&mut self, chunk: Bytes) -> EngineResult<()> {
        self.hasher.update(&chunk);
        self.upload.write(chunk).await?;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.hasher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hasher.is_empty()
    }

    /// Discard the staged bytes.
    pub async fn abort(self) {
        discard_staged(self.upload).await;
    }
}

async fn discard_staged(upload: Box<dyn StreamingUpload>) {
    if let Err(e) = upload.abort().await {
        tracing::debug!(error = %e, "Failed to discard staged upload");
    }
}

/// Orchestrates the blob store and metadata store for uploads and deletes.
pub struct DedupEngine {
    inner: Arc<EngineInner>,
}

/// Backends and locks, shared with the tasks that run the locked sections.
struct EngineInner {
    storage: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    locks: DigestLocks,
}

fn task_failed(e: JoinError) -> EngineError {
    EngineError::Metadata(MetadataError::Internal(format!(
        "engine task failed: {e}"
    )))
}

impl DedupEngine {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        lock_shards: usize,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                storage,
                metadata,
                locks: DigestLocks::new(lock_shards),
            }),
        }
    }

    /// Open a staged upload.
    pub async fn begin_upload(&self) -> EngineResult<HashingUpload> {
        let upload = self.inner.storage.put_stream().await?;
        Ok(HashingUpload {
            upload,
            hasher: ContentHash::hasher(),
        })
    }

    /// Commit a fully written upload for `owner`.
    ///
    /// Existing content gains a reference and the staged copy is discarded.
    /// New content is placed in the blob store before its record is
    /// inserted, so a record never points at a missing blob.
    ///
    /// Placement and insert run on a spawned task that finishes even if the
    /// caller is dropped, so a placed blob always gets its record.
    #[tracing::instrument(skip(self, upload, owner), fields(owner = %owner, size = upload.len()))]
    pub async fn commit(
        &self,
        upload: HashingUpload,
        owner: &Identity,
        filename: &str,
        mime_type: &str,
    ) -> EngineResult<UploadOutcome> {
        let start = Instant::now();
        let HashingUpload { upload, hasher } = upload;
        let size = hasher.len();
        let digest = hasher.finalize();
        let row = FileRow::new_upload(filename, owner.as_str(), size, mime_type, &digest)?;

        let inner = self.inner.clone();
        let outcome = tokio::spawn(
            async move { inner.commit_staged(upload, digest, size, row).await }
                .in_current_span(),
        )
        .await
        .map_err(task_failed)??;

        metrics::UPLOAD_DURATION.observe(start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Upload an in-memory payload through the same path as streamed uploads.
    pub async fn upload_bytes(
        &self,
        owner: &Identity,
        filename: &str,
        mime_type: &str,
        data: Bytes,
    ) -> EngineResult<UploadOutcome> {
        let mut upload = self.begin_upload().await?;
        upload.write(data).await?;
        self.commit(upload, owner, filename, mime_type).await
    }

    /// Drop one reference held by `requester`.
    ///
    /// The release and any blob removal run on a spawned task, so a removed
    /// record never leaves its blob behind when the caller goes away.
    #[tracing::instrument(skip(self, requester, id), fields(requester = %requester, file_id = %id))]
    pub async fn delete(&self, requester: &Identity, id: FileId) -> EngineResult<DeleteOutcome> {
        let record = self.load(id).await?;
        if !AccessPolicy::can_delete(Some(requester), &record) {
            return Err(EngineError::Forbidden(
                "only the owner can delete this file".to_string(),
            ));
        }

        let inner = self.inner.clone();
        let digest = record.content_digest;
        tokio::spawn(async move { inner.release(id, digest).await }.in_current_span())
            .await
            .map_err(task_failed)?
    }

    /// Fetch a record the requester may read.
    ///
    /// Non-owners get the record without its share token.
    pub async fn get_for_read(
        &self,
        requester: Option<&Identity>,
        id: FileId,
    ) -> EngineResult<FileRecord> {
        let record = self.load(id).await?;
        if !AccessPolicy::can_read(requester, &record) {
            return Err(EngineError::Forbidden(
                "file is private to its owner".to_string(),
            ));
        }
        let is_owner = requester.is_some_and(|r| record.is_owned_by(r.as_str()));
        Ok(if is_owner { record } else { record.redacted() })
    }

    /// Records owned by `owner`, newest first.
    pub async fn list_owned(&self, owner: &Identity) -> EngineResult<Vec<FileRecord>> {
        self.inner.metadata
            .list_files_by_owner(owner.as_str())
            .await?
            .into_iter()
            .map(|row| row.into_record().map_err(EngineError::from))
            .collect()
    }

    /// Records owned by `owner` matching `filter`, newest first.
    pub async fn search(
        &self,
        owner: &Identity,
        filter: &FileSearch,
    ) -> EngineResult<Vec<FileRecord>> {
        self.inner.metadata
            .search_files(owner.as_str(), filter)
            .await?
            .into_iter()
            .map(|row| row.into_record().map_err(EngineError::from))
            .collect()
    }

    /// Readable record plus its content stream.
    pub async fn download(
        &self,
        requester: Option<&Identity>,
        id: FileId,
    ) -> EngineResult<(FileRecord, ByteStream)> {
        let record = self.get_for_read(requester, id).await?;
        let kind = match requester {
            Some(r) if record.is_owned_by(r.as_str()) => DownloadKind::Owner,
            _ => DownloadKind::Public,
        };
        let stream = self.open_content(&record, kind).await?;
        Ok((record, stream))
    }

    /// Open the content stream for an already authorised record.
    ///
    /// The download counter is bumped on a detached task; failures there are
    /// logged and the count may lag or miss.
    pub async fn open_content(
        &self,
        record: &FileRecord,
        kind: DownloadKind,
    ) -> EngineResult<ByteStream> {
        let stream = self.inner.storage.get_stream(&record.content_digest).await?;
        metrics::record_download(kind.as_str());

        let metadata = self.inner.metadata.clone();
        let id = *record.id.as_uuid();
        tokio::spawn(async move {
            if let Err(e) = metadata.increment_download_count(id).await {
                tracing::debug!(file_id = %id, error = %e, "Failed to bump download count");
            }
        });

        Ok(stream)
    }

    async fn load(&self, id: FileId) -> EngineResult<FileRecord> {
        let row = self
            .inner.metadata
            .get_file(*id.as_uuid())
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("file {id}")))?;
        Ok(row.into_record()?)
    }
}

impl EngineInner {
    async fn commit_staged(
        &self,
        upload: Box<dyn StreamingUpload>,
        digest: ContentHash,
        size: u64,
        row: FileRow,
    ) -> EngineResult<UploadOutcome> {
        let _guard = self.locks.lock(&digest).await;
        let mut staged = Some(upload);

        for attempt in 0..=MAX_DIGEST_CONFLICT_RETRIES {
            if let Some(existing) = self.metadata.increment_reference(&row.content_digest).await? {
                if let Some(staged) = staged.take() {
                    discard_staged(staged).await;
                }
                let record = existing.into_record()?;
                metrics::FILES_DEDUPLICATED.inc();
                metrics::BYTES_DEDUPLICATED.inc_by(size);
                tracing::info!(
                    file_id = %record.id,
                    digest = %digest,
                    reference_count = record.reference_count,
                    "Upload deduplicated"
                );
                return Ok(UploadOutcome {
                    record,
                    disposition: UploadDisposition::Deduplicated,
                });
            }

            // On a retry the blob is already in place from the first attempt.
            if let Some(staged) = staged.take() {
                staged.finish(&digest).await?;
            }

            match self.metadata.insert_file(&row).await {
                Ok(()) => {
                    let record = row.into_record()?;
                    metrics::FILES_CREATED.inc();
                    metrics::BYTES_STORED.inc_by(size);
                    tracing::info!(
                        file_id = %record.id,
                        digest = %digest,
                        size = size,
                        "Stored new content"
                    );
                    return Ok(UploadOutcome {
                        record,
                        disposition: UploadDisposition::Created,
                    });
                }
                Err(MetadataError::AlreadyExists(_)) => {
                    metrics::DIGEST_CONFLICTS.inc();
                    tracing::debug!(
                        digest = %digest,
                        attempt = attempt,
                        "Lost digest insert race, retrying as increment"
                    );
                }
                Err(e) => {
                    self.discard_unreferenced_blob(&digest).await;
                    return Err(e.into());
                }
            }
        }

        Err(EngineError::Metadata(MetadataError::Internal(format!(
            "digest {digest} kept conflicting after {MAX_DIGEST_CONFLICT_RETRIES} retries"
        ))))
    }

    /// Remove a just-placed blob after its record insert failed, unless some
    /// other writer recorded the digest meanwhile.
    async fn discard_unreferenced_blob(&self, digest: &ContentHash) {
        match self.metadata.get_file_by_digest(&digest.to_hex()).await {
            Ok(None) => {
                if let Err(e) = self.storage.delete(digest).await {
                    tracing::warn!(digest = %digest, error = %e, "Failed to remove unrecorded blob");
                }
            }
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::warn!(digest = %digest, error = %e, "Could not check digest before blob cleanup");
            }
        }
    }

    async fn release(&self, id: FileId, digest: ContentHash) -> EngineResult<DeleteOutcome> {
        let _guard = self.locks.lock(&digest).await;

        match self.metadata.release_reference(*id.as_uuid()).await? {
            ReleaseOutcome::Missing => Err(EngineError::NotFound(format!("file {id}"))),
            ReleaseOutcome::Decremented { remaining } => {
                metrics::REFERENCES_RELEASED.inc();
                tracing::info!(digest = %digest, remaining = remaining, "Released file reference");
                Ok(DeleteOutcome {
                    id,
                    status: DeleteStatus::Dereferenced,
                    reference_count: remaining,
                })
            }
            ReleaseOutcome::Removed(_) => {
                metrics::REFERENCES_RELEASED.inc();
                metrics::RECORDS_REMOVED.inc();

                // Still under the digest lock, so no upload can re-reference
                // the blob before it is gone.
                match self.storage.delete(&digest).await {
                    Ok(()) => {}
                    Err(StorageError::NotFound(_)) => {
                        metrics::BLOB_DELETE_FAILURES.inc();
                        tracing::warn!(digest = %digest, "Blob already missing when removing record");
                    }
                    Err(e) => {
                        metrics::BLOB_DELETE_FAILURES.inc();
                        tracing::error!(digest = %digest, error = %e, "Failed to delete blob after removing record");
                    }
                }

                tracing::info!(digest = %digest, "Removed file record and blob");
                Ok(DeleteOutcome {
                    id,
                    status: DeleteStatus::Deleted,
                    reference_count: 0,
                })
            }
        }
    }
}
