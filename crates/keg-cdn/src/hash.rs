use std::fmt;
use std::str::FromStr;

use crate::error::{CdnError, Result};

/// Shortest hash that still yields two full partition levels.
pub const MIN_HASH_LEN: usize = 4;

/// A content hash stored as a lowercase hex string.
///
/// CDN objects, configs and state cache entries are all addressed by their hash. The value is
/// validated on construction so it is always safe to embed in an on-disk path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hash: impl AsRef<str>) -> Result<Self> {
        let hash = hash.as_ref();
        if hash.len() < MIN_HASH_LEN {
            return Err(CdnError::InvalidHash {
                hash: hash.to_string(),
                reason: "hash must be at least 4 characters long",
            });
        }
        if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CdnError::InvalidHash {
                hash: hash.to_string(),
                reason: "hash must be hexadecimal",
            });
        }
        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// MD5 of `bytes`, the digest the CDN names its content by.
    pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self(format!("{:x}", md5::compute(bytes.as_ref())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `{h[0:2]}/{h[2:4]}/{h}`
    pub fn partition(&self) -> String {
        format!("{}/{}/{}", &self.0[0..2], &self.0[2..4], self.0)
    }

    /// Same as [`ContentHash::partition`] with `suffix` appended verbatim (e.g. `.index`).
    pub fn partition_with_suffix(&self, suffix: &str) -> String {
        let mut out = self.partition();
        out.push_str(suffix);
        out
    }
}

/// Partition a raw hex hash into its nested cache path.
pub fn partition_hash(hash: &str) -> Result<String> {
    Ok(ContentHash::new(hash)?.partition())
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = CdnError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}
