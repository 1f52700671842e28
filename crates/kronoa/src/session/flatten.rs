//! Flattening: materialize an edition's entire resolved path set locally
//! and mark it as a traversal terminus, so readers stop walking ancestry
//! there and older editions become collectable.

use bytes::Bytes;
use std::collections::BTreeMap;

use super::{finish_locked, Session};
use crate::edition::EditionId;
use crate::hash::PathFile;
use crate::lock::LockHandle;
use crate::{layout, Error, Result};

impl Session {
    /// Flatten `id` under the lock. Returns how many path files were
    /// materialized; re-flattening an already-flat edition writes nothing
    /// new. Object blobs are never copied — only path files.
    pub async fn flatten(&self, id: EditionId) -> Result<usize> {
        let mut lock = self.acquire_lock().await?;
        let result = self.flatten_locked(&mut lock, id).await;
        finish_locked(lock, result).await
    }

    async fn flatten_locked(&self, lock: &mut LockHandle, id: EditionId) -> Result<usize> {
        if !self.editions.exists(id).await? {
            return Err(Error::not_found(&layout::edition_prefix(id)));
        }

        // Nearest-edition-wins merge of every path file in the chain.
        let mut merged: BTreeMap<String, PathFile> = BTreeMap::new();
        for level in self.editions.ancestors(id).await? {
            lock.renew_if_due().await?;
            for (path, entry) in self.editions.path_files(level).await? {
                merged.entry(path).or_insert(entry);
            }
        }

        let mut materialized = 0usize;
        for (path, entry) in merged {
            lock.renew_if_due().await?;
            // Tombstones need no materialization: once the terminus marker
            // lands, resolution simply stops here and the path is gone.
            if let PathFile::Hash(hash) = entry {
                let wrote = self
                    .store
                    .write_if_absent(
                        &layout::path_file(id, &path),
                        Bytes::from(PathFile::Hash(hash).encode()),
                    )
                    .await?;
                if wrote {
                    materialized += 1;
                }
            }
        }

        self.store
            .write(&layout::flattened(id), Bytes::new())
            .await?;
        tracing::info!(%id, materialized, "flattened edition");
        Ok(materialized)
    }
}
