//! Content addressing: the canonical digest and the path-file payload codec.

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// A sha-256 content address. The hex rendering (64 lowercase chars) is the
/// object's canonical identity; carrying the raw bytes in a newtype keeps
/// hashes from ever being mistaken for paths.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Digest `data` with the canonical hash function.
    pub fn digest(data: &[u8]) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hasher.finalize().into())
    }

    pub fn from_hex(hex_str: &str) -> Option<ContentHash> {
        let decoded = hex::decode(hex_str).ok()?;
        let exact: [u8; 32] = decoded.as_slice().try_into().ok()?;
        Some(ContentHash(exact))
    }

    /// The two-hex-char shard this object lives under.
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("{self}").serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let text = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        ContentHash::from_hex(&text)
            .ok_or_else(|| D::Error::custom(format!("invalid content hash: {text:?}")))
    }
}

/// Decoded payload of an edition path file: either a content address or a
/// tombstone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PathFile {
    Hash(ContentHash),
    Deleted,
}

const HASH_PREFIX: &str = "sha256:";
const DELETED: &str = "deleted";

impl PathFile {
    pub fn encode(&self) -> String {
        match self {
            PathFile::Hash(hash) => format!("{HASH_PREFIX}{hash}"),
            PathFile::Deleted => DELETED.to_string(),
        }
    }

    /// Parse a path-file payload. Trailing whitespace is tolerated; anything
    /// else is a corrupt entry.
    pub fn decode(key: &str, data: &[u8]) -> Result<PathFile> {
        let corrupt = || {
            Error::Storage(storage::Error::Corrupt {
                path: key.to_string(),
                detail: "malformed path-file payload".to_string(),
            })
        };
        let text = std::str::from_utf8(data).map_err(|_| corrupt())?.trim_end();
        if text == DELETED {
            return Ok(PathFile::Deleted);
        }
        let hex_str = text.strip_prefix(HASH_PREFIX).ok_or_else(corrupt)?;
        match ContentHash::from_hex(hex_str) {
            Some(hash) => Ok(PathFile::Hash(hash)),
            None => Err(corrupt()),
        }
    }
}
