//! Cache key derivation.
//!
//! A key is the lowercase hex SHA-256 digest of `text=<text>&font=<font>`.
//! The field order and separators define the on-disk namespace: changing them
//! orphans every existing entry.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::render::RenderRequest;

const KEY_LEN: usize = 64;

/// Identifies one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a `(text, font)` pair.
    pub fn derive(text: &str, font: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"text=");
        hasher.update(text.as_bytes());
        hasher.update(b"&font=");
        hasher.update(font.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn for_request(request: &RenderRequest) -> Self {
        Self::derive(request.text(), request.font())
    }

    /// Accept a previously derived key, e.g. recovered from a blob file name.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == KEY_LEN
            && value
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
