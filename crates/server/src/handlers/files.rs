//! File upload, listing, download and delete endpoints.

use crate::auth::{get_auth, get_trace_id, require_auth};
use crate::engine::{DeleteOutcome, EngineError, UploadOutcome};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Serialize;
use vault_core::file::{detect_mime_type, sanitize_filename};
use vault_core::{FileId, FileRecord, Identity, SearchQuery};
use vault_storage::ByteStream;

/// Multipart field names that carry files. Other fields are ignored.
pub const UPLOAD_FIELDS: &[&str] = &["files", "file"];

/// Per-file result of an upload request.
#[derive(Debug, Serialize)]
pub struct UploadedFile {
    /// Name as sent by the client, after sanitising.
    pub filename: String,
    /// `created`, `deduplicated` or `failed`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: Vec<UploadedFile>,
}

/// Delete response.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: FileId,
    pub status: &'static str,
    pub reference_count: u64,
}

impl From<DeleteOutcome> for DeleteResponse {
    fn from(outcome: DeleteOutcome) -> Self {
        Self {
            id: outcome.id,
            status: outcome.status.as_str(),
            reference_count: outcome.reference_count,
        }
    }
}

/// POST /v1/files - Upload one or more files as multipart form data.
///
/// Each file part is stored independently: a failure on one part is
/// reported in its result and does not undo the others. A part larger
/// than `max_upload_bytes` aborts the whole request with 413.
#[tracing::instrument(skip(state, req), fields(owner = tracing::field::Empty))]
pub async fn upload_files(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<UploadResponse>> {
    let trace_id = get_trace_id(&req).cloned().unwrap_or_default();
    let owner = require_auth(&req)?.clone();
    tracing::Span::current().record("owner", owner.as_str());

    let mut multipart = Multipart::from_request(req, &state)
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;

    let max_upload_bytes = state.config.server.max_upload_bytes;
    let mut results = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read multipart field: {e}")))?
    {
        let is_file = field.name().is_some_and(|name| UPLOAD_FIELDS.contains(&name));
        if !is_file {
            drain_field(field).await?;
            continue;
        }

        let filename = sanitize_filename(field.file_name().unwrap_or_default());
        let mime_type = detect_mime_type(&filename, field.content_type());

        let result = match store_field(&state, field, &owner, &filename, &mime_type, max_upload_bytes)
            .await
        {
            Ok(outcome) => UploadedFile {
                filename,
                status: outcome.disposition.as_str(),
                file: Some(outcome.record),
                error: None,
            },
            Err(FieldError::Request(e)) => {
                metrics::record_upload_error(e.code());
                return Err(e);
            }
            Err(FieldError::Engine(e)) => {
                metrics::record_upload_error(e.kind());
                tracing::warn!(
                    trace_id = %trace_id,
                    filename = %filename,
                    error = %e,
                    "File upload failed"
                );
                UploadedFile {
                    filename,
                    status: "failed",
                    file: None,
                    error: Some(ApiError::from(e).code().to_string()),
                }
            }
        };
        results.push(result);
    }

    if results.is_empty() {
        return Err(EngineError::Validation(format!(
            "no file parts found (expected field {})",
            UPLOAD_FIELDS.join(" or ")
        ))
        .into());
    }

    Ok(Json(UploadResponse { files: results }))
}

/// Why a single file part could not be stored.
enum FieldError {
    /// The request itself is unusable; stop processing.
    Request(ApiError),
    /// Only this file failed.
    Engine(EngineError),
}

impl From<EngineError> for FieldError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// Stream one file part through the engine.
async fn store_field(
    state: &AppState,
    mut field: Field<'_>,
    owner: &Identity,
    filename: &str,
    mime_type: &str,
    max_upload_bytes: u64,
) -> Result<UploadOutcome, FieldError> {
    let mut upload = state.engine.begin_upload().await?;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                upload.abort().await;
                return Err(FieldError::Request(ApiError::BadRequest(format!(
                    "failed reading file part: {e}"
                ))));
            }
        };

        let size = upload.len().checked_add(chunk.len() as u64);
        if size.is_none_or(|size| size > max_upload_bytes) {
            upload.abort().await;
            return Err(FieldError::Request(ApiError::PayloadTooLarge(format!(
                "file {filename} exceeds the {max_upload_bytes} byte limit"
            ))));
        }

        if let Err(e) = upload.write(chunk).await {
            upload.abort().await;
            return Err(e.into());
        }
    }

    Ok(state
        .engine
        .commit(upload, owner, filename, mime_type)
        .await?)
}

async fn drain_field(mut field: Field<'_>) -> ApiResult<()> {
    while field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed reading multipart field: {e}")))?
        .is_some()
    {}
    Ok(())
}

/// GET /v1/files - List the caller's files, newest first.
#[tracing::instrument(skip(state, req))]
pub async fn list_files(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<FileRecord>>> {
    let owner = require_auth(&req)?;
    Ok(Json(state.engine.list_owned(owner).await?))
}

/// GET /v1/files/search - Filter the caller's files.
#[tracing::instrument(skip(state, query, req))]
pub async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    req: Request,
) -> ApiResult<Json<Vec<FileRecord>>> {
    let owner = require_auth(&req)?;
    let filter = query
        .into_filter()
        .map_err(|e| EngineError::Validation(e.to_string()))?;
    Ok(Json(state.engine.search(owner, &filter).await?))
}

/// GET /v1/files/{id} - File metadata.
#[tracing::instrument(skip(state, req), fields(file_id = %id))]
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Json<FileRecord>> {
    let id = FileId::parse(&id)?;
    let record = state.engine.get_for_read(get_auth(&req), id).await?;
    Ok(Json(record))
}

/// GET /v1/files/{id}/download - File content.
#[tracing::instrument(skip(state, req), fields(file_id = %id))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let id = FileId::parse(&id)?;
    let (record, stream) = state.engine.download(get_auth(&req), id).await?;
    Ok(content_response(&record, stream))
}

/// DELETE /v1/files/{id} - Drop one reference to a file.
#[tracing::instrument(skip(state, req), fields(file_id = %id))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Json<DeleteResponse>> {
    let requester = require_auth(&req)?;
    let id = FileId::parse(&id)?;
    let outcome = state.engine.delete(requester, id).await?;
    Ok(Json(outcome.into()))
}

/// Streaming response carrying a record's content.
pub(crate) fn content_response(record: &FileRecord, stream: ByteStream) -> Response {
    let body_stream = stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, record.mime_type.clone()),
            (CONTENT_LENGTH, record.size.to_string()),
            (CONTENT_DISPOSITION, content_disposition(&record.filename)),
        ],
        Body::from_stream(body_stream),
    )
        .into_response()
}

/// `attachment` disposition with a header-safe ASCII filename.
fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}
