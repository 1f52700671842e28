//! The byte-addressable storage contract consumed by the Kronoa content
//! engine, plus its two development-grade implementations.
//!
//! Keys are `/`-separated UTF-8 strings. A backend is a flat namespace of
//! whole-object reads and writes; "directories" exist only as key prefixes.
//! The engine never assumes more than the operations declared on [`Backend`],
//! which keeps object-store implementations honest: no rename, no append,
//! no partial writes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

mod fs;
mod memory;

pub use fs::FilesystemBackend;
pub use memory::MemoryBackend;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key not found: {path}")]
    NotFound { path: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt entry at {path}: {detail}")]
    Corrupt { path: String, detail: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Shared backend handle, as threaded through the engine.
pub type Store = Arc<dyn Backend>;

/// Contract every storage backend must satisfy.
///
/// Whole-object writes are the atomic unit: a reader of any key observes
/// either the prior bytes or the new bytes, never a prefix. `write_if_absent`
/// and `atomic_increment` are the only primitives with cross-process
/// synchronization requirements; everything else is last-writer-wins.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Read the full value at `path`. `Error::NotFound` when absent.
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Write (overwrite) the full value at `path`.
    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Write `data` only when `path` is absent. Returns whether this call
    /// performed the write.
    async fn write_if_absent(&self, path: &str, data: Bytes) -> Result<bool>;

    /// Delete the value at `path`. Deleting an absent key is a no-op.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// List keys beginning with `prefix`, in lexicographic order.
    ///
    /// With `delimiter` of `/`, only immediate children are returned: keys
    /// containing a further delimiter past `prefix` are rolled up into their
    /// common prefix, reported once, with a trailing `/`.
    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Vec<String>>;

    /// Atomically advance the ASCII counter at `path`.
    ///
    /// When the key is absent the counter is seeded with `initial` and
    /// `initial` is returned; otherwise the stored value plus one is
    /// persisted and returned. Two concurrent callers never observe the
    /// same value.
    async fn atomic_increment(&self, path: &str, initial: u64) -> Result<u64>;

    /// Last-modified timestamp of the value at `path`.
    ///
    /// The backend defines the clock: filesystem mtime locally, the blob
    /// store's Last-Modified remotely. Callers treat it as coarse.
    async fn modified(&self, path: &str) -> Result<DateTime<Utc>>;
}

/// Roll flat `keys` up to immediate children of `prefix`, object-store
/// ListObjects style. `keys` must already be filtered to the prefix.
fn roll_up(keys: impl IntoIterator<Item = String>, prefix: &str, delimiter: char) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for key in keys {
        let rest = &key[prefix.len()..];
        match rest.find(delimiter) {
            Some(ix) => {
                let dir = format!("{prefix}{}{delimiter}", &rest[..ix]);
                if out.last() != Some(&dir) {
                    out.push(dir);
                }
            }
            None => out.push(key),
        }
    }
    out.dedup();
    out
}

#[cfg(test)]
mod test {
    use super::roll_up;

    #[test]
    fn roll_up_groups_children() {
        let keys = vec![
            "a/b".to_string(),
            "a/c/d".to_string(),
            "a/c/e".to_string(),
            "a/f".to_string(),
        ];
        assert_eq!(
            roll_up(keys, "a/", '/'),
            vec!["a/b".to_string(), "a/c/".to_string(), "a/f".to_string()],
        );
    }
}
