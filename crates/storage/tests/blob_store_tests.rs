// Integration tests for the filesystem blob store.
// Covers digest addressing, concurrent writers, and staging cleanup.

mod common;

use bytes::Bytes;
use common::seeded_bytes;
use futures::StreamExt;
use std::sync::Arc;
use tempfile::TempDir;
use vault_core::ContentHash;
use vault_storage::{BlobStore, FilesystemBackend};

fn backend(dir: &TempDir) -> Arc<FilesystemBackend> {
    Arc::new(FilesystemBackend::new(dir.path().join("uploads")))
}

#[tokio::test]
async fn test_blob_stored_at_sharded_digest_path() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);

    let data = seeded_bytes(7, 10_000);
    let digest = ContentHash::compute(&data);
    store.put(&digest, data.clone()).await.unwrap();

    let hex = digest.to_hex();
    let on_disk = dir
        .path()
        .join("uploads")
        .join("blobs")
        .join(&hex[..2])
        .join(&hex[2..4])
        .join(&hex);
    assert_eq!(std::fs::read(on_disk).unwrap(), data.to_vec());
}

#[tokio::test]
async fn test_concurrent_identical_writers_leave_one_copy() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);

    let data = seeded_bytes(42, 256 * 1024);
    let digest = ContentHash::compute(&data);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let data = data.clone();
        handles.push(tokio::spawn(async move {
            let mut upload = store.put_stream().await.unwrap();
            for chunk in data.chunks(10_000) {
                upload.write(Bytes::copy_from_slice(chunk)).await.unwrap();
            }
            upload.finish(&digest).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), data.len() as u64);
    }

    assert_eq!(store.get(&digest).await.unwrap(), data);
    let blob_dir = dir
        .path()
        .join("uploads")
        .join(digest.blob_key())
        .parent()
        .unwrap()
        .to_path_buf();
    assert_eq!(std::fs::read_dir(blob_dir).unwrap().count(), 1);
    assert_eq!(store.sweep_staging().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dropped_upload_is_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);

    let mut upload = store.put_stream().await.unwrap();
    upload.write(seeded_bytes(1, 4096)).await.unwrap();
    drop(upload);

    // Drop cleanup runs on a spawned task.
    let staging = dir.path().join("uploads").join("staging");
    for _ in 0..50 {
        if std::fs::read_dir(&staging).unwrap().count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

#[tokio::test]
async fn test_delete_removes_blob() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);

    let data = seeded_bytes(3, 100);
    let digest = ContentHash::compute(&data);
    store.put(&digest, data).await.unwrap();

    store.delete(&digest).await.unwrap();
    assert!(!store.exists(&digest).await.unwrap());
    assert!(store.delete(&digest).await.is_err());
}

#[tokio::test]
async fn test_stream_read_matches_content() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);

    let data = seeded_bytes(9, 300_000);
    let digest = ContentHash::compute(&data);
    store.put(&digest, data.clone()).await.unwrap();

    let mut stream = store.get_stream(&digest).await.unwrap();
    let mut collected = Vec::with_capacity(data.len());
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(ContentHash::compute(&collected), digest);
}
