//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{FileRow, ReleaseOutcome};
use crate::repos::FileRepo;
use crate::repos::files::{name_prefilter, retain_matching, size_bound};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use uuid::Uuid;
use vault_core::FileSearch;
use vault_core::config::PgSslMode;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL error code 23505 = unique_violation.
fn unique_violation_constraint(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err
        && db_err.code().as_deref() == Some("23505")
    {
        return Some(db_err.constraint().unwrap_or("unique").to_string());
    }
    None
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, e.g. the password
    /// via an environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepo for PostgresStore {
    async fn insert_file(&self, file: &FileRow) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO files (
                id, filename, owner, size_bytes, mime_type, content_digest,
                upload_timestamp, reference_count, download_count, is_public, public_token
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
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
            Err(e) => match unique_violation_constraint(&e) {
                Some(constraint) => Err(MetadataError::AlreadyExists(format!(
                    "content_digest {} conflicts on {constraint}",
                    file.content_digest
                ))),
                None => Err(e.into()),
            },
        }
    }

    async fn get_file(&self, id: Uuid) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_file_by_digest(&self, digest: &str) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE content_digest = $1")
            .bind(digest)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn increment_reference(&self, digest: &str) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(
            "UPDATE files SET reference_count = reference_count + 1 WHERE content_digest = $1 RETURNING *",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn release_reference(&self, id: Uuid) -> MetadataResult<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent releases and increments of this record.
        let current: Option<i64> =
            sqlx::query_scalar("SELECT reference_count FROM files WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = match current {
            None => ReleaseOutcome::Missing,
            Some(count) if count > 1 => {
                let remaining: i64 = sqlx::query_scalar(
                    "UPDATE files SET reference_count = reference_count - 1 WHERE id = $1 RETURNING reference_count",
                )
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
                ReleaseOutcome::Decremented {
                    remaining: u64::try_from(remaining).unwrap_or(0),
                }
            }
            Some(_) => {
                let row = sqlx::query_as::<_, FileRow>("DELETE FROM files WHERE id = $1 RETURNING *")
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
            "SELECT * FROM files WHERE owner = $1 ORDER BY upload_timestamp DESC, id",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn search_files(&self, owner: &str, filter: &FileSearch) -> MetadataResult<Vec<FileRow>> {
        let rows = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT * FROM files
            WHERE owner = $1
              AND ($2::text IS NULL OR lower(filename) LIKE $2 ESCAPE '\')
              AND ($3::text IS NULL OR lower(mime_type) = $3)
              AND ($4::bigint IS NULL OR size_bytes >= $4)
              AND ($5::bigint IS NULL OR size_bytes <= $5)
              AND ($6::timestamptz IS NULL OR upload_timestamp >= $6)
              AND ($7::timestamptz IS NULL OR upload_timestamp <= $7)
            ORDER BY upload_timestamp DESC, id
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
        sqlx::query("UPDATE files SET download_count = download_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enable_public_token(&self, id: Uuid, token: &str) -> MetadataResult<Option<FileRow>> {
        // COALESCE keeps the first token when callers race.
        let result = sqlx::query_as::<_, FileRow>(
            "UPDATE files SET is_public = TRUE, public_token = COALESCE(public_token, $1) WHERE id = $2 RETURNING *",
        )
        .bind(token)
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(e) if unique_violation_constraint(&e).is_some() => Err(
                MetadataError::AlreadyExists("public_token already exists".to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn revoke_public_token(&self, id: Uuid) -> MetadataResult<bool> {
        let result =
            sqlx::query("UPDATE files SET is_public = FALSE, public_token = NULL WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_public_file(&self, token: &str) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(
            "SELECT * FROM files WHERE public_token = $1 AND is_public",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
