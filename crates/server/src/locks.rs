//! Per-digest mutual exclusion.

use tokio::sync::{Mutex, MutexGuard};
use vault_core::ContentHash;

/// Fixed table of async mutexes, one shard per slice of the digest space.
///
/// Holding the shard for a digest serialises every
/// increment-or-insert and release-or-remove sequence on that digest within
/// this process. Distinct digests only contend when they share a shard.
pub struct DigestLocks {
    shards: Box<[Mutex<()>]>,
}

impl DigestLocks {
    /// Create a table with `shards` mutexes (at least one).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(())).collect();
        Self { shards }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Acquire the shard covering `digest`.
    pub async fn lock(&self, digest: &ContentHash) -> MutexGuard<'_, ()> {
        self.shards[digest.shard(self.shards.len())].lock().await
    }
}

impl std::fmt::Debug for DigestLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestLocks")
            .field("shards", &self.shards.len())
            .finish()
    }
}
