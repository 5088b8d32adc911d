//! File records, identifiers, and search filters.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};
use uuid::Uuid;

/// MIME type used when nothing better is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Display name given to uploads that arrive without one.
pub const UNNAMED_FILE: &str = "unnamed";

/// Maximum accepted length of a display filename, in characters.
pub const MAX_FILENAME_LEN: usize = 255;

/// Unique identifier for a file record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidFileId(format!("{s}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One logical record per distinct content digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// Display name from the first uploader.
    pub filename: String,
    /// Identity of the first uploader.
    pub owner: String,
    pub size: u64,
    pub mime_type: String,
    pub content_digest: ContentHash,
    #[serde(with = "time::serde::rfc3339")]
    pub upload_timestamp: OffsetDateTime,
    pub reference_count: u64,
    pub download_count: u64,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_token: Option<String>,
}

impl FileRecord {
    /// Whether `identity` owns this record.
    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.owner == identity
    }

    /// Copy of the record suitable for a caller who is not the owner.
    ///
    /// The public token is a capability; only the owner gets to see it.
    pub fn redacted(mut self) -> Self {
        self.public_token = None;
        self
    }
}

/// Normalize a client-supplied filename into a display name.
///
/// Only the final path component is kept, surrounding whitespace and
/// control characters are removed, and empty names become [`UNNAMED_FILE`].
pub fn sanitize_filename(name: &str) -> String {
    let basename = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    let cleaned: String = basename
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILENAME_LEN)
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        UNNAMED_FILE.to_string()
    } else {
        cleaned
    }
}

/// Pick the MIME type for an upload.
///
/// A known filename extension wins over whatever the client declared, so a
/// part cannot relabel content that is later served on public links. The
/// declared type is used only for unknown extensions.
pub fn detect_mime_type(filename: &str, declared: Option<&str>) -> String {
    if let Some(mime) = mime_from_extension(filename) {
        return mime.to_string();
    }

    declared
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

fn mime_from_extension(filename: &str) -> Option<&'static str> {
    let (_, ext) = filename.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mime)
}

/// Raw search parameters as they arrive on a query string.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring of the filename.
    #[serde(alias = "name")]
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`.
    pub date_start: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD` (whole day inclusive).
    pub date_end: Option<String>,
}

/// Validated search filter. Every present field must match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSearch {
    pub name_pattern: Option<String>,
    pub mime_type: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub date_start: Option<OffsetDateTime>,
    pub date_end: Option<OffsetDateTime>,
}

impl SearchQuery {
    /// Validate and convert into a [`FileSearch`].
    pub fn into_filter(self) -> crate::Result<FileSearch> {
        let name_pattern = non_empty(self.filename);
        let mime_type = non_empty(self.mime_type).map(|m| m.to_ascii_lowercase());

        let date_start = self
            .date_start
            .as_deref()
            .map(|s| parse_bound(s, Bound::Start))
            .transpose()?;
        let date_end = self
            .date_end
            .as_deref()
            .map(|s| parse_bound(s, Bound::End))
            .transpose()?;

        if let (Some(min), Some(max)) = (self.size_min, self.size_max)
            && min > max
        {
            return Err(crate::Error::InvalidFilter(format!(
                "size_min ({min}) is greater than size_max ({max})"
            )));
        }

        if let (Some(start), Some(end)) = (date_start, date_end)
            && start > end
        {
            return Err(crate::Error::InvalidFilter(
                "date_start is after date_end".to_string(),
            ));
        }

        Ok(FileSearch {
            name_pattern,
            mime_type,
            size_min: self.size_min,
            size_max: self.size_max,
            date_start,
            date_end,
        })
    }
}

impl FileSearch {
    /// Evaluate the filter against a record in memory.
    pub fn matches(&self, record: &FileRecord) -> bool {
        if let Some(pattern) = &self.name_pattern
            && !record
                .filename
                .to_lowercase()
                .contains(&pattern.to_lowercase())
        {
            return false;
        }
        if let Some(mime) = &self.mime_type
            && !record.mime_type.eq_ignore_ascii_case(mime)
        {
            return false;
        }
        if self.size_min.is_some_and(|min| record.size < min) {
            return false;
        }
        if self.size_max.is_some_and(|max| record.size > max) {
            return false;
        }
        if self.date_start.is_some_and(|t| record.upload_timestamp < t) {
            return false;
        }
        if self.date_end.is_some_and(|t| record.upload_timestamp > t) {
            return false;
        }
        true
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bound(value: &str, bound: Bound) -> crate::Result<OffsetDateTime> {
    let value = value.trim();
    if let Ok(ts) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(ts.to_offset(UtcOffset::UTC));
    }

    let date = Date::parse(value, format_description!("[year]-[month]-[day]")).map_err(|_| {
        crate::Error::InvalidFilter(format!(
            "invalid date '{value}': expected RFC 3339 or YYYY-MM-DD"
        ))
    })?;

    let datetime = match bound {
        Bound::Start => date.midnight(),
        Bound::End => date
            .with_hms_nano(23, 59, 59, 999_999_999)
            .map_err(|e| crate::Error::InvalidFilter(e.to_string()))?,
    };
    Ok(datetime.assume_utc())
}
