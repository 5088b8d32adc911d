//! Storage test utilities.

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use vault_storage::{BlobStore, FilesystemBackend};

/// A test storage wrapper that cleans up on drop.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestStorage {
    pub backend: Arc<FilesystemBackend>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    /// Create a new test storage with a temporary directory.
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path().join("blobs"));

        Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        }
    }

    /// Get a reference to the blob store.
    pub fn store(&self) -> Arc<dyn BlobStore> {
        self.backend.clone()
    }

    /// Root directory of the backend.
    pub fn root(&self) -> &Path {
        self.backend.root()
    }
}

/// Count regular files below `dir`, recursively.
#[allow(dead_code)]
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
