//! Access decisions for file records.
//!
//! The owner of a record may do anything with it. Everyone else may only
//! read a record, and only while it is public.

use crate::file::FileRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trusted identity of the caller, as resolved at the service boundary.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an identity string. Empty identities are rejected.
    pub fn new(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(crate::Error::InvalidToken("empty identity".to_string()));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stateless access policy.
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn can_read(requester: Option<&Identity>, record: &FileRecord) -> bool {
        record.is_public || Self::is_owner(requester, record)
    }

    pub fn can_delete(requester: Option<&Identity>, record: &FileRecord) -> bool {
        Self::is_owner(requester, record)
    }

    pub fn can_share(requester: Option<&Identity>, record: &FileRecord) -> bool {
        Self::is_owner(requester, record)
    }

    fn is_owner(requester: Option<&Identity>, record: &FileRecord) -> bool {
        requester.is_some_and(|id| record.is_owned_by(id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileId;
    use crate::hash::ContentHash;
    use time::OffsetDateTime;

    fn record(owner: &str, is_public: bool) -> FileRecord {
        FileRecord {
            id: FileId::new(),
            filename: "a.txt".to_string(),
            owner: owner.to_string(),
            size: 1,
            mime_type: "text/plain".to_string(),
            content_digest: ContentHash::compute(b"a"),
            upload_timestamp: OffsetDateTime::now_utc(),
            reference_count: 1,
            download_count: 0,
            is_public,
            public_token: None,
        }
    }

    #[test]
    fn test_owner_has_all_rights() {
        let alice = Identity::new("alice").unwrap();
        let rec = record("alice", false);
        assert!(AccessPolicy::can_read(Some(&alice), &rec));
        assert!(AccessPolicy::can_delete(Some(&alice), &rec));
        assert!(AccessPolicy::can_share(Some(&alice), &rec));
    }

    #[test]
    fn test_others_read_only_when_public() {
        let bob = Identity::new("bob").unwrap();
        let private = record("alice", false);
        let public = record("alice", true);

        assert!(!AccessPolicy::can_read(Some(&bob), &private));
        assert!(AccessPolicy::can_read(Some(&bob), &public));
        assert!(AccessPolicy::can_read(None, &public));
        assert!(!AccessPolicy::can_read(None, &private));

        assert!(!AccessPolicy::can_delete(Some(&bob), &public));
        assert!(!AccessPolicy::can_share(Some(&bob), &public));
        assert!(!AccessPolicy::can_delete(None, &public));
    }

    #[test]
    fn test_empty_identity_rejected() {
        assert!(Identity::new("  ").is_err());
    }
}
