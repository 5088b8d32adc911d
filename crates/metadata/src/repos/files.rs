//! File record repository.

use crate::error::MetadataResult;
use crate::models::{FileRow, ReleaseOutcome};
use async_trait::async_trait;
use uuid::Uuid;
use vault_core::FileSearch;

/// Repository for file records.
///
/// Every mutation of `reference_count` is a single atomic statement or runs
/// inside one transaction, so concurrent callers never lose an update.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a new record.
    ///
    /// Returns `AlreadyExists` when a record with the same content digest
    /// (or public token) already exists.
    async fn insert_file(&self, file: &FileRow) -> MetadataResult<()>;

    /// Get a record by id.
    async fn get_file(&self, id: Uuid) -> MetadataResult<Option<FileRow>>;

    /// Get the record holding a content digest.
    async fn get_file_by_digest(&self, digest: &str) -> MetadataResult<Option<FileRow>>;

    /// Add one reference to the record holding `digest`.
    ///
    /// Returns the updated row, or `None` when no record has that digest.
    async fn increment_reference(&self, digest: &str) -> MetadataResult<Option<FileRow>>;

    /// Drop one reference from a record, deleting the row when it was the last.
    async fn release_reference(&self, id: Uuid) -> MetadataResult<ReleaseOutcome>;

    /// All records owned by `owner`, newest first.
    async fn list_files_by_owner(&self, owner: &str) -> MetadataResult<Vec<FileRow>>;

    /// Records owned by `owner` matching every constraint in `filter`, newest first.
    async fn search_files(&self, owner: &str, filter: &FileSearch) -> MetadataResult<Vec<FileRow>>;

    /// Bump the download counter. Missing rows are ignored.
    async fn increment_download_count(&self, id: Uuid) -> MetadataResult<()>;

    /// Mark a record public, keeping an existing token if one is set.
    ///
    /// Returns the updated row (whose `public_token` is the effective token),
    /// or `None` when the record does not exist.
    async fn enable_public_token(&self, id: Uuid, token: &str) -> MetadataResult<Option<FileRow>>;

    /// Make a record private and clear its token.
    ///
    /// Returns `false` when the record does not exist.
    async fn revoke_public_token(&self, id: Uuid) -> MetadataResult<bool>;

    /// Look up a public record by its token.
    async fn get_public_file(&self, token: &str) -> MetadataResult<Option<FileRow>>;
}

/// SQL prefilter pattern for the filter's name needle.
///
/// Database `lower()` folding differs from Rust's for non-ASCII letters, so
/// those needles are not pushed down and [`retain_matching`] decides alone.
pub(crate) fn name_prefilter(filter: &FileSearch) -> Option<String> {
    filter
        .name_pattern
        .as_deref()
        .filter(|needle| needle.is_ascii())
        .map(substring_pattern)
}

/// Keep the rows that satisfy every constraint of `filter`, preserving order.
///
/// Applied after the SQL query so that case folding and timestamp bounds are
/// identical on every backend.
pub(crate) fn retain_matching(
    rows: Vec<FileRow>,
    filter: &FileSearch,
) -> MetadataResult<Vec<FileRow>> {
    let mut matched = Vec::with_capacity(rows.len());
    for row in rows {
        if filter.matches(&row.clone().into_record()?) {
            matched.push(row);
        }
    }
    Ok(matched)
}

/// Build a case-insensitive `LIKE` pattern matching `needle` as a substring.
///
/// `%`, `_` and `\` in the needle are escaped; queries use `ESCAPE '\'`.
fn substring_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_ascii_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Clamp an unsigned size bound into the signed range the databases store.
pub(crate) fn size_bound(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}
