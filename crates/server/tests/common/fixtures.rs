//! Test fixtures for generating test data and credentials.

use bytes::Bytes;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use time::OffsetDateTime;
use vault_core::ContentHash;
use vault_core::config::AuthConfig;
use vault_server::auth::Claims;

/// Multipart boundary used by [`multipart_body`].
pub const BOUNDARY: &str = "vault-test-boundary-7MA4YWxkTrZu0gW";

/// Reproducible pseudo-random payload; equal seeds give equal bytes.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    Bytes::from(data)
}

/// Hex digest the service should report for `data`.
#[allow(dead_code)]
pub fn digest_hex(data: &[u8]) -> String {
    ContentHash::compute(data).to_hex()
}

/// Mint a bearer token for `username` signed with the test secret.
#[allow(dead_code)]
pub fn token_for(username: &str) -> String {
    token_with(username, &AuthConfig::for_testing().jwt_secret, 3600)
}

/// Mint a token with an explicit secret and lifetime (negative = expired).
#[allow(dead_code)]
pub fn token_with(username: &str, secret: &str, ttl_secs: i64) -> String {
    let claims = Claims {
        username: username.to_string(),
        exp: (OffsetDateTime::now_utc().unix_timestamp() + ttl_secs) as u64,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to encode test token")
}

/// One part of a multipart form.
#[allow(dead_code)]
pub struct Part<'a> {
    pub field: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

#[allow(dead_code)]
impl<'a> Part<'a> {
    /// A file part in the `files` field.
    pub fn file(filename: &'a str, data: &'a [u8]) -> Self {
        Self {
            field: "files",
            filename: Some(filename),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: &'a str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn in_field(mut self, field: &'a str) -> Self {
        self.field = field;
        self
    }
}

/// Encode parts as a `multipart/form-data` body using [`BOUNDARY`].
#[allow(dead_code)]
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.field);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
