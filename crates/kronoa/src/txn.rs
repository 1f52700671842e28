//! The transaction buffer: edits accumulate in memory and land in storage
//! only at flush, objects first, path files second. The buffer is owned
//! exclusively by its session and is never shared.

use bytes::Bytes;
use std::collections::BTreeMap;
use storage::Store;

use crate::edition::EditionId;
use crate::hash::{ContentHash, PathFile};
use crate::{layout, Result};

/// One buffered edit for a path. Later edits to the same path replace
/// earlier ones.
#[derive(Debug, Clone)]
pub(crate) enum Pending {
    /// Fresh bytes to upload and reference.
    Write { hash: ContentHash, data: Bytes },
    /// Reference to an object that already exists in storage.
    Copy { hash: ContentHash },
    /// Tombstone.
    Delete,
}

#[derive(Debug, Default)]
pub(crate) struct TransactionBuffer {
    entries: BTreeMap<String, Pending>,
    open: bool,
}

impl TransactionBuffer {
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn begin(&mut self) {
        self.open = true;
    }

    pub fn get(&self, path: &str) -> Option<&Pending> {
        self.entries.get(path)
    }

    pub fn record_write(&mut self, path: String, data: Bytes) -> ContentHash {
        let hash = ContentHash::digest(&data);
        self.entries.insert(path, Pending::Write { hash, data });
        hash
    }

    pub fn record_copy(&mut self, path: String, hash: ContentHash) {
        self.entries.insert(path, Pending::Copy { hash });
    }

    pub fn record_delete(&mut self, path: String) {
        self.entries.insert(path, Pending::Delete);
    }

    /// Drop a single buffered entry. Returns whether one was present.
    pub fn discard(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Discard everything and leave the transaction.
    pub fn rollback(&mut self) {
        self.entries.clear();
        self.open = false;
    }

    /// Flush buffered edits into `edition`.
    ///
    /// Objects are uploaded first, with write-if-absent semantics so a
    /// retried flush re-uploads nothing; path files follow. On error the
    /// buffer is left intact: the edition may hold a partial flush, but it
    /// is unreferenced by any pointer until staged, so retrying or
    /// abandoning it are both safe.
    pub async fn flush(&mut self, store: &Store, edition: EditionId) -> Result<()> {
        for (path, pending) in &self.entries {
            if let Pending::Write { hash, data } = pending {
                let wrote = store
                    .write_if_absent(&layout::object(hash), data.clone())
                    .await?;
                tracing::trace!(%hash, %path, wrote, "flushed object");
            }
        }
        for (path, pending) in &self.entries {
            let payload = match pending {
                Pending::Write { hash, .. } | Pending::Copy { hash } => PathFile::Hash(*hash),
                Pending::Delete => PathFile::Deleted,
            };
            store
                .write(
                    &layout::path_file(edition, path),
                    Bytes::from(payload.encode()),
                )
                .await?;
        }
        tracing::debug!(%edition, entries = self.entries.len(), "flushed transaction");
        self.entries.clear();
        self.open = false;
        Ok(())
    }
}
