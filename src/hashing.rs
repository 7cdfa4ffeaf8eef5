//! Content addressing for long-term memory fragments.
//!
//! Policy `sha256-trim-v1`: strip leading and trailing Unicode whitespace,
//! keep case and interior whitespace untouched, SHA-256 the UTF-8 bytes,
//! lowercase hex. Local and remote dedup keys both come from here; changing
//! any step orphans every stored hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{MemoraError, Result};

/// Identifier of the hashing policy, recorded in long-term stats output.
pub const HASH_POLICY: &str = "sha256-trim-v1";

/// Normalize text exactly as the hash sees it.
pub fn normalize(text: &str) -> &str {
    text.trim()
}

/// Hash a fragment under [`HASH_POLICY`].
pub fn content_hash(text: &str) -> ContentHash {
    let digest = Sha256::digest(normalize(text).as_bytes());
    ContentHash(hex::encode(digest))
}

/// A validated 64-char lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let valid = raw.len() == 64
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(MemoraError::InvalidInput(format!(
                "content hash must be 64 lowercase hex chars, got {raw:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for display.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    /// True when `text` hashes to this value.
    pub fn matches(&self, text: &str) -> bool {
        content_hash(text) == *self
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = MemoraError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}
