//! Application state shared across handlers.

use crate::auth::TokenVerifier;
use crate::engine::DedupEngine;
use crate::sharing::SharingService;
use std::sync::Arc;
use vault_core::config::AppConfig;
use vault_metadata::MetadataStore;
use vault_storage::BlobStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob storage backend.
    pub storage: Arc<dyn BlobStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upload and delete orchestration.
    pub engine: Arc<DedupEngine>,
    /// Public share tokens.
    pub sharing: Arc<SharingService>,
    /// Bearer token verification.
    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    /// Wire the services together over the given stores.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let engine = DedupEngine::new(
            storage.clone(),
            metadata.clone(),
            config.server.lock_shards,
        );
        let sharing = SharingService::new(metadata.clone());
        let verifier = TokenVerifier::new(&config.auth);

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            engine: Arc::new(engine),
            sharing: Arc::new(sharing),
            verifier: Arc::new(verifier),
        }
    }
}
