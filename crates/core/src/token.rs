//! Public share tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use std::fmt;

/// Number of random bytes behind a freshly minted token.
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Bounds on the length of a token accepted from a URL.
pub const MIN_TOKEN_LEN: usize = 16;
pub const MAX_TOKEN_LEN: usize = 128;

/// Unguessable capability granting unauthenticated read access to one record.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicToken(String);

impl PublicToken {
    /// Mint a token from the thread-local CSPRNG (seeded from the OS).
    ///
    /// 32 random bytes, base64url without padding: 43 URL-safe characters.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Validate a token taken from a URL or the database.
    pub fn parse(value: &str) -> crate::Result<Self> {
        if !(MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&value.len()) {
            return Err(crate::Error::InvalidToken(format!(
                "length {} outside {MIN_TOKEN_LEN}..={MAX_TOKEN_LEN}",
                value.len()
            )));
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(crate::Error::InvalidToken(
                "token contains characters outside the URL-safe alphabet".to_string(),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for PublicToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix; the full value is a credential.
        write!(f, "PublicToken({}…)", &self.0[..self.0.len().min(6)])
    }
}

impl fmt::Display for PublicToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
