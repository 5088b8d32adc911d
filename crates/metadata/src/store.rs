//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::FileRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        if let Some(secs) = query_timeout_secs {
            tracing::debug!(
                query_timeout_secs = secs,
                "SQLite query timeout is advisory only; use PostgreSQL for strict timeouts"
            );
        }

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// SQLite reports unique violations as "UNIQUE constraint failed: files.<column>".
fn unique_violation_column(err: &sqlx::Error) -> Option<&'static str> {
    if let sqlx::Error::Database(db_err) = err
        && db_err.message().contains("UNIQUE constraint")
    {
        if db_err.message().contains("public_token") {
            return Some("public_token");
        }
        return Some("content_digest");
    }
    None
}

mod sqlite_impl {
    use super::*;
    use crate::models::{FileRow, ReleaseOutcome};
    use crate::repos::files::{name_prefilter, retain_matching, size_bound};
    use uuid::Uuid;
    use vault_core::FileSearch;

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn insert_file(&self, file: &FileRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO files (
                    id, filename, owner, size_bytes, mime_type, content_digest,
                    upload_timestamp, reference_count, download_count, is_public, public_token
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(file.id)
            .bind(&file.filename)
            .bind(&file.owner)
            .bind(file.size_bytes)
            .bind(&file.mime_type)
            .bind(&file.content_digest)
            .bind(file.upload_timestamp)
            .bind(file.reference_count)
            .bind(file.download_count)
            .bind(file.is_public)
            .bind(&file.public_token)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) => match unique_violation_column(&e) {
                    Some("content_digest") => Err(MetadataError::AlreadyExists(format!(
                        "content_digest {} already exists",
                        file.content_digest
                    ))),
                    Some(column) => Err(MetadataError::AlreadyExists(format!(
                        "{column} already exists"
                    ))),
                    None => Err(e.into()),
                },
            }
        }

        async fn get_file(&self, id: Uuid) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_file_by_digest(&self, digest: &str) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE content_digest = ?")
                .bind(digest)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn increment_reference(&self, digest: &str) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>(
                "UPDATE files SET reference_count = reference_count + 1 WHERE content_digest = ? RETURNING *",
            )
            .bind(digest)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn release_reference(&self, id: Uuid) -> MetadataResult<ReleaseOutcome> {
            let mut tx = self.pool.begin().await?;

            let current: Option<i64> =
                sqlx::query_scalar("SELECT reference_count FROM files WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;

            let outcome = match current {
                None => ReleaseOutcome::Missing,
                Some(count) if count > 1 => {
                    let remaining: i64 = sqlx::query_scalar(
                        "UPDATE files SET reference_count = reference_count - 1 WHERE id = ? RETURNING reference_count",
                    )
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
                    ReleaseOutcome::Decremented {
                        remaining: u64::try_from(remaining).unwrap_or(0),
                    }
                }
                Some(_) => {
                    let row =
                        sqlx::query_as::<_, FileRow>("DELETE FROM files WHERE id = ? RETURNING *")
                            .bind(id)
                            .fetch_one(&mut *tx)
                            .await?;
                    ReleaseOutcome::Removed(row)
                }
            };

            tx.commit().await?;
            Ok(outcome)
        }

        async fn list_files_by_owner(&self, owner: &str) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE owner = ? ORDER BY julianday(upload_timestamp) DESC, rowid DESC",
            )
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn search_files(
            &self,
            owner: &str,
            filter: &FileSearch,
        ) -> MetadataResult<Vec<FileRow>> {
            // julianday() keeps millisecond precision; retain_matching applies
            // exact bounds.
            let rows = sqlx::query_as::<_, FileRow>(
                r#"
                SELECT * FROM files
                WHERE owner = ?1
                  AND (?2 IS NULL OR lower(filename) LIKE ?2 ESCAPE '\')
                  AND (?3 IS NULL OR lower(mime_type) = ?3)
                  AND (?4 IS NULL OR size_bytes >= ?4)
                  AND (?5 IS NULL OR size_bytes <= ?5)
                  AND (?6 IS NULL OR julianday(upload_timestamp) >= julianday(?6))
                  AND (?7 IS NULL OR julianday(upload_timestamp) <= julianday(?7))
                ORDER BY julianday(upload_timestamp) DESC, rowid DESC
                "#,
            )
            .bind(owner)
            .bind(name_prefilter(filter))
            .bind(filter.mime_type.as_ref().map(|m| m.to_lowercase()))
            .bind(size_bound(filter.size_min))
            .bind(size_bound(filter.size_max))
            .bind(filter.date_start)
            .bind(filter.date_end)
            .fetch_all(&self.pool)
            .await?;

            retain_matching(rows, filter)
        }

        async fn increment_download_count(&self, id: Uuid) -> MetadataResult<()> {
            sqlx::query("UPDATE files SET download_count = download_count + 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn enable_public_token(
            &self,
            id: Uuid,
            token: &str,
        ) -> MetadataResult<Option<FileRow>> {
            // COALESCE keeps the first token when callers race.
            let result = sqlx::query_as::<_, FileRow>(
                "UPDATE files SET is_public = 1, public_token = COALESCE(public_token, ?) WHERE id = ? RETURNING *",
            )
            .bind(token)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

            match result {
                Ok(row) => Ok(row),
                Err(e) if unique_violation_column(&e).is_some() => Err(
                    MetadataError::AlreadyExists("public_token already exists".to_string()),
                ),
                Err(e) => Err(e.into()),
            }
        }

        async fn revoke_public_token(&self, id: Uuid) -> MetadataResult<bool> {
            let result =
                sqlx::query("UPDATE files SET is_public = 0, public_token = NULL WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_public_file(&self, token: &str) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE public_token = ? AND is_public = 1",
            )
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id BLOB PRIMARY KEY,
    filename TEXT NOT NULL,
    owner TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    mime_type TEXT NOT NULL,
    content_digest TEXT NOT NULL UNIQUE,
    upload_timestamp TEXT NOT NULL,
    reference_count INTEGER NOT NULL DEFAULT 1 CHECK (reference_count >= 1),
    download_count INTEGER NOT NULL DEFAULT 0 CHECK (download_count >= 0),
    is_public INTEGER NOT NULL DEFAULT 0,
    public_token TEXT UNIQUE
);
CREATE INDEX IF NOT EXISTS idx_files_owner_uploaded ON files(owner, upload_timestamp);
CREATE INDEX IF NOT EXISTS idx_files_filename_lower ON files(lower(filename));
"#;
