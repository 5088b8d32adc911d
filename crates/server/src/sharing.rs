//! Public share tokens for file records.

use crate::engine::{EngineError, EngineResult};
use std::sync::Arc;
use vault_core::{AccessPolicy, FileId, FileRecord, Identity, PublicToken};
use vault_metadata::{MetadataError, MetadataStore};

/// Fresh tokens tried before giving up on a token collision.
const MAX_TOKEN_ATTEMPTS: usize = 3;

/// Grants, revokes and resolves public read access.
pub struct SharingService {
    metadata: Arc<dyn MetadataStore>,
}

impl SharingService {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Make a record public and return its token.
    ///
    /// A record that is already public keeps its token; concurrent callers
    /// converge on whichever token was stored first.
    #[tracing::instrument(skip(self, requester, id), fields(requester = %requester, file_id = %id))]
    pub async fn enable_public_sharing(
        &self,
        requester: &Identity,
        id: FileId,
    ) -> EngineResult<PublicToken> {
        let record = self.load_for_share(requester, id).await?;
        if record.is_public
            && let Some(existing) = record.public_token.as_deref()
        {
            return parse_stored(existing);
        }

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let candidate = PublicToken::generate();
            // Never store anything that would not survive a URL round trip.
            let candidate = PublicToken::parse(candidate.as_str())
                .map_err(|e| EngineError::Validation(e.to_string()))?;

            match self
                .metadata
                .enable_public_token(*id.as_uuid(), candidate.as_str())
                .await
            {
                Ok(Some(row)) => {
                    let stored = row.public_token.as_deref().ok_or_else(|| {
                        EngineError::Metadata(MetadataError::Internal(format!(
                            "file {id} is public without a token"
                        )))
                    })?;
                    tracing::info!("Public sharing enabled");
                    return parse_stored(stored);
                }
                Ok(None) => return Err(EngineError::NotFound(format!("file {id}"))),
                Err(MetadataError::AlreadyExists(_)) => {
                    tracing::warn!(attempt = attempt, "Public token collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::Metadata(MetadataError::Internal(format!(
            "could not mint a unique token after {MAX_TOKEN_ATTEMPTS} attempts"
        ))))
    }

    /// Make a record private again. Revoking a private record is a no-op.
    #[tracing::instrument(skip(self, requester, id), fields(requester = %requester, file_id = %id))]
    pub async fn revoke_public_sharing(&self, requester: &Identity, id: FileId) -> EngineResult<()> {
        self.load_for_share(requester, id).await?;
        if self.metadata.revoke_public_token(*id.as_uuid()).await? {
            tracing::info!("Public sharing revoked");
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("file {id}")))
        }
    }

    /// Find the public record behind `token`.
    ///
    /// Malformed, unknown and revoked tokens all resolve to `NotFound`.
    pub async fn resolve_public_download(&self, token: &str) -> EngineResult<FileRecord> {
        let not_found = || EngineError::NotFound("public file".to_string());
        let token = PublicToken::parse(token).map_err(|_| not_found())?;
        let row = self
            .metadata
            .get_public_file(token.as_str())
            .await?
            .ok_or_else(not_found)?;
        Ok(row.into_record()?.redacted())
    }

    async fn load_for_share(&self, requester: &Identity, id: FileId) -> EngineResult<FileRecord> {
        let record = self
            .metadata
            .get_file(*id.as_uuid())
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("file {id}")))?
            .into_record()?;
        if !AccessPolicy::can_share(Some(requester), &record) {
            return Err(EngineError::Forbidden(
                "only the owner can change sharing".to_string(),
            ));
        }
        Ok(record)
    }
}

fn parse_stored(token: &str) -> EngineResult<PublicToken> {
    PublicToken::parse(token).map_err(|e| {
        EngineError::Metadata(MetadataError::Internal(format!("stored token invalid: {e}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DedupEngine;
    use crate::engine::tests::MemoryBlobStore;
    use bytes::Bytes;
    use vault_metadata::SqliteStore;

    struct Fixture {
        engine: DedupEngine,
        sharing: SharingService,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(dir.path().join("metadata.db"), None)
                .await
                .unwrap(),
        );
        let engine = DedupEngine::new(Arc::new(MemoryBlobStore::default()), metadata.clone(), 4);
        Fixture {
            engine,
            sharing: SharingService::new(metadata),
            _dir: dir,
        }
    }

    async fn upload(f: &Fixture, owner: &Identity, data: &'static [u8]) -> FileId {
        f.engine
            .upload_bytes(owner, "shared.txt", "text/plain", Bytes::from_static(data))
            .await
            .unwrap()
            .record
            .id
    }

    #[tokio::test]
    async fn test_enable_twice_returns_same_token() {
        let f = fixture().await;
        let alice = Identity::new("alice").unwrap();
        let id = upload(&f, &alice, b"hello").await;

        let first = f.sharing.enable_public_sharing(&alice, id).await.unwrap();
        let second = f.sharing.enable_public_sharing(&alice, id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 43);

        let record = f.sharing.resolve_public_download(first.as_str()).await.unwrap();
        assert_eq!(record.id, id);
        assert!(record.public_token.is_none());
    }

    #[tokio::test]
    async fn test_revoke_invalidates_token_and_reenable_mints_new_one() {
        let f = fixture().await;
        let alice = Identity::new("alice").unwrap();
        let id = upload(&f, &alice, b"hello").await;

        let old = f.sharing.enable_public_sharing(&alice, id).await.unwrap();
        f.sharing.revoke_public_sharing(&alice, id).await.unwrap();
        assert!(matches!(
            f.sharing.resolve_public_download(old.as_str()).await,
            Err(EngineError::NotFound(_))
        ));

        // Idempotent.
        f.sharing.revoke_public_sharing(&alice, id).await.unwrap();

        let new = f.sharing.enable_public_sharing(&alice, id).await.unwrap();
        assert_ne!(old, new);
    }

    #[tokio::test]
    async fn test_only_owner_changes_sharing() {
        let f = fixture().await;
        let alice = Identity::new("alice").unwrap();
        let bob = Identity::new("bob").unwrap();
        let id = upload(&f, &alice, b"hello").await;

        assert!(matches!(
            f.sharing.enable_public_sharing(&bob, id).await,
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            f.sharing.revoke_public_sharing(&bob, id).await,
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            f.sharing.enable_public_sharing(&alice, FileId::new()).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_tokens_are_not_found() {
        let f = fixture().await;
        for token in ["", "short", "has spaces in it but long enough", &"a".repeat(43)] {
            assert!(matches!(
                f.sharing.resolve_public_download(token).await,
                Err(EngineError::NotFound(_))
            ));
        }
    }
}
