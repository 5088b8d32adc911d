//! Core domain types and shared logic for the vault file service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content digests and incremental hashing
//! - File records, identifiers, and search filters
//! - Access policy for owners and public readers
//! - Public share tokens
//! - Configuration

pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod policy;
pub mod token;

pub use error::{Error, Result};
pub use file::{FileId, FileRecord, FileSearch, SearchQuery};
pub use hash::{ContentHash, ContentHasher};
pub use policy::{AccessPolicy, Identity};
pub use token::PublicToken;
