//! Server test utilities.

use super::fixtures::{BOUNDARY, Part, multipart_body};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use vault_core::config::{AppConfig, MetadataConfig, StorageConfig};
use vault_metadata::{MetadataStore, SqliteStore};
use vault_server::{AppState, create_router};
use vault_storage::{BlobStore, FilesystemBackend};

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub storage_path: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn BlobStore> = Arc::new(FilesystemBackend::new(&storage_path));

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };

        modifier(&mut config);

        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            storage_path,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Send a request and return status plus parsed JSON (or `Null`).
    pub async fn json_request(
        &self,
        method: &str,
        uri: &str,
        auth_token: Option<&str>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = self.raw_request(method, uri, auth_token).await;
        (status, parse_json(&bytes))
    }

    /// Send a request and return status plus raw body bytes.
    pub async fn raw_request(
        &self,
        method: &str,
        uri: &str,
        auth_token: Option<&str>,
    ) -> (StatusCode, Bytes) {
        let response = self.send(method, uri, auth_token).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    /// Send a bodiless request and return the full response.
    pub async fn send(&self, method: &str, uri: &str, auth_token: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = auth_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = builder.body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// POST a multipart upload to `/v1/files`.
    pub async fn upload(&self, parts: &[Part<'_>], auth_token: Option<&str>) -> (StatusCode, Value) {
        let request = upload_request(parts, auth_token);
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, parse_json(&body))
    }

    /// Upload a single file and return its record JSON.
    pub async fn upload_one(&self, filename: &str, data: &[u8], auth_token: &str) -> Value {
        let (status, body) = self
            .upload(&[Part::file(filename, data)], Some(auth_token))
            .await;
        assert_eq!(status, StatusCode::OK, "upload failed: {body}");
        body["files"][0]["file"].clone()
    }
}

/// Build a multipart upload request for `/v1/files`.
#[allow(dead_code)]
pub fn upload_request(parts: &[Part<'_>], auth_token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/files")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(multipart_body(parts))).unwrap()
}

/// Parse a response body as JSON, `Null` when empty or not JSON.
#[allow(dead_code)]
pub fn parse_json(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(bytes).unwrap_or(Value::Null)
    }
}
