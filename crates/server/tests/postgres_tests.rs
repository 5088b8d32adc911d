//! Engine and sharing behaviour against a PostgreSQL metadata store.
//!
//! Skipped when Docker is unavailable or SKIP_POSTGRES_TESTS is set.

mod common;

use bytes::Bytes;
use common::fixtures::seeded_bytes;
use common::metadata::postgres_or_skip;
use common::storage::{TestStorage, count_files};
use futures::TryStreamExt;
use std::sync::Arc;
use vault_core::{ContentHash, FileId, Identity};
use vault_server::engine::{DeleteStatus, UploadDisposition};
use vault_server::{DedupEngine, EngineError, SharingService};

fn identity(name: &str) -> Identity {
    Identity::new(name).unwrap()
}

#[tokio::test]
async fn test_postgres_concurrent_uploads_share_one_record() {
    let Some(pg) = postgres_or_skip().await else {
        return;
    };
    let storage = TestStorage::new();
    let engine = Arc::new(DedupEngine::new(storage.store(), pg.store(), 16));
    let data = seeded_bytes(100, 64 * 1024);

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = engine.clone();
        let data = data.clone();
        handles.push(tokio::spawn(async move {
            engine
                .upload_bytes(
                    &identity(&format!("user{}", i % 4)),
                    "same.bin",
                    "application/octet-stream",
                    data,
                )
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().disposition == UploadDisposition::Created {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let row = pg
        .store()
        .get_file_by_digest(&ContentHash::compute(&data).to_hex())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.reference_count, 10);
    assert_eq!(count_files(&storage.root().join("blobs")), 1);
}

#[tokio::test]
async fn test_postgres_delete_and_share() {
    let Some(pg) = postgres_or_skip().await else {
        return;
    };
    let storage = TestStorage::new();
    let engine = DedupEngine::new(storage.store(), pg.store(), 16);
    let sharing = SharingService::new(pg.store());
    let alice = identity("alice");
    let data = Bytes::from_static(b"shared over postgres");

    let first = engine
        .upload_bytes(&alice, "pg.txt", "text/plain", data.clone())
        .await
        .unwrap();
    engine
        .upload_bytes(&alice, "pg.txt", "text/plain", data.clone())
        .await
        .unwrap();
    let id = first.record.id;

    let token = sharing.enable_public_sharing(&alice, id).await.unwrap();
    let record = sharing
        .resolve_public_download(token.as_str())
        .await
        .unwrap();
    assert_eq!(record.id, id);
    assert!(record.public_token.is_none());

    let (_, stream) = engine.download(Some(&alice), id).await.unwrap();
    let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
    assert_eq!(chunks.concat(), data.to_vec());

    let outcome = engine.delete(&alice, id).await.unwrap();
    assert_eq!(outcome.status, DeleteStatus::Dereferenced);
    assert_eq!(outcome.reference_count, 1);

    let outcome = engine.delete(&alice, id).await.unwrap();
    assert_eq!(outcome.status, DeleteStatus::Deleted);
    assert_eq!(count_files(&storage.root().join("blobs")), 0);

    assert!(matches!(
        sharing.resolve_public_download(token.as_str()).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.delete(&alice, id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.get_for_read(Some(&alice), FileId::new()).await,
        Err(EngineError::NotFound(_))
    ));
}
