//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;
use vault_core::{ContentHash, FileId, FileRecord};

/// Row of the `files` table. One row per distinct content digest.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: Uuid,
    pub filename: String,
    pub owner: String,
    pub size_bytes: i64,
    pub mime_type: String,
    /// Lowercase hex SHA-256 of the content.
    pub content_digest: String,
    pub upload_timestamp: OffsetDateTime,
    pub reference_count: i64,
    pub download_count: i64,
    pub is_public: bool,
    pub public_token: Option<String>,
}

impl FileRow {
    /// Build the row for a first upload of some content (`reference_count = 1`).
    pub fn new_upload(
        filename: impl Into<String>,
        owner: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        digest: &ContentHash,
    ) -> MetadataResult<Self> {
        let size_bytes = i64::try_from(size)
            .map_err(|_| MetadataError::Constraint(format!("file size {size} out of range")))?;
        Ok(Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            owner: owner.into(),
            size_bytes,
            mime_type: mime_type.into(),
            content_digest: digest.to_hex(),
            upload_timestamp: now_micros(),
            reference_count: 1,
            download_count: 0,
            is_public: false,
            public_token: None,
        })
    }

    /// Convert into the domain record, validating stored values.
    pub fn into_record(self) -> MetadataResult<FileRecord> {
        let content_digest = ContentHash::from_hex(&self.content_digest).map_err(|e| {
            MetadataError::Internal(format!("corrupt digest for file {}: {e}", self.id))
        })?;
        Ok(FileRecord {
            id: FileId::from_uuid(self.id),
            filename: self.filename,
            owner: self.owner,
            size: non_negative(self.size_bytes),
            mime_type: self.mime_type,
            content_digest,
            upload_timestamp: self.upload_timestamp,
            reference_count: non_negative(self.reference_count),
            download_count: non_negative(self.download_count),
            is_public: self.is_public,
            public_token: self.public_token,
        })
    }
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Current UTC time truncated to microseconds, the precision both backends keep.
pub fn now_micros() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

/// Result of dropping one reference to a file.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// Other references remain.
    Decremented { remaining: u64 },
    /// That was the last reference; the row is gone and its blob must go too.
    Removed(FileRow),
    /// No row with that id.
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_upload_defaults() {
        let digest = ContentHash::compute(b"data");
        let row = FileRow::new_upload("a.txt", "alice", 4, "text/plain", &digest).unwrap();
        assert_eq!(row.reference_count, 1);
        assert_eq!(row.download_count, 0);
        assert!(!row.is_public);
        assert_eq!(row.content_digest, digest.to_hex());
        assert_eq!(row.upload_timestamp.nanosecond() % 1_000, 0);
    }

    #[test]
    fn test_into_record_roundtrip() {
        let digest = ContentHash::compute(b"data");
        let row = FileRow::new_upload("a.txt", "alice", 4, "text/plain", &digest).unwrap();
        let id = row.id;
        let record = row.into_record().unwrap();
        assert_eq!(*record.id.as_uuid(), id);
        assert_eq!(record.size, 4);
        assert_eq!(record.content_digest, digest);
    }

    #[test]
    fn test_into_record_rejects_corrupt_digest() {
        let digest = ContentHash::compute(b"data");
        let mut row = FileRow::new_upload("a.txt", "alice", 4, "text/plain", &digest).unwrap();
        row.content_digest = "not-hex".to_string();
        assert!(matches!(row.into_record(), Err(MetadataError::Internal(_))));
    }
}
