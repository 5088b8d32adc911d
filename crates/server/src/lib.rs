//! HTTP API server for the vault file service.
//!
//! This crate provides:
//! - Multipart upload with content deduplication
//! - Reference-counted delete
//! - Owner listing, search and download
//! - Public share links with revocation

pub mod auth;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod metrics;
pub mod routes;
pub mod sharing;
pub mod state;

pub use auth::{Requester, TraceId};
pub use engine::{DedupEngine, EngineError};
pub use error::ApiError;
pub use routes::create_router;
pub use sharing::SharingService;
pub use state::AppState;
