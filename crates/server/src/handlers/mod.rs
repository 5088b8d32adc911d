//! HTTP request handlers.

pub mod auth;
pub mod capabilities;
pub mod files;
pub mod share;

pub use auth::*;
pub use capabilities::*;
pub use files::*;
pub use share::*;
