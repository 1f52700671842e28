//! The content session: the engine's public facade.
//!
//! A session is pinned to one edition and a mode. Read operations are
//! available in every mode; mutation requires an editing checkout. All
//! storage access flows through the backend contract, which is also the
//! only suspension point; operations within a session are strictly
//! sequential.

mod flatten;
mod gc;
mod publish;

pub use gc::{GcOptions, GcReport};

use bytes::Bytes;
use serde::Serialize;
use storage::Store;

use crate::edition::{EditionId, EditionStore, Resolution};
use crate::hash::ContentHash;
use crate::lock::{LockHandle, LockOptions};
use crate::txn::{Pending, TransactionBuffer};
use crate::{layout, path, state, Error, Result};
use crate::state::{SessionState, Source};

/// What a session is allowed to do, and on whose behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Read-only view of the production pointer.
    Production,
    /// Read-only view of the staging pointer.
    Staging,
    /// Checked-out working edition; the only mode that accepts writes.
    Editing {
        label: String,
        base: EditionId,
        source: Source,
    },
    /// The edition has been submitted for review; reads still work.
    Submitted,
}

pub struct Session {
    store: Store,
    editions: EditionStore,
    mode: Mode,
    edition: EditionId,
    txn: TransactionBuffer,
    lock_options: LockOptions,
    verify_reads: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("edition", &self.edition)
            .field("txn", &self.txn)
            .field("lock_options", &self.lock_options)
            .field("verify_reads", &self.verify_reads)
            .finish()
    }
}

/// Result of [`Session::stat`]. Valid paths always produce a value; a path
/// nobody ever wrote simply reports `NotFound`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stat {
    pub path: String,
    pub status: PathStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_from: Option<EditionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PathStatus {
    Exists,
    Deleted,
    NotFound,
}

impl Session {
    fn new(store: Store, mode: Mode, edition: EditionId) -> Session {
        Session {
            editions: EditionStore::new(store.clone()),
            store,
            mode,
            edition,
            txn: TransactionBuffer::default(),
            lock_options: LockOptions::default(),
            verify_reads: false,
        }
    }

    /// Read-only session at the current production edition.
    pub async fn production(store: Store) -> Result<Session> {
        let pointer = state::read_pointer(&store, layout::PRODUCTION).await?;
        Ok(Session::new(store, Mode::Production, pointer.edition))
    }

    /// Read-only session at the current staging edition.
    pub async fn staging(store: Store) -> Result<Session> {
        let pointer = state::read_pointer(&store, layout::STAGING).await?;
        Ok(Session::new(store, Mode::Staging, pointer.edition))
    }

    /// Check out a fresh working edition branched from `from`, recorded
    /// under `label`. Fails with `label_in_use` when the label is taken.
    pub async fn checkout(store: Store, label: &str, from: Source) -> Result<Session> {
        path::validate_label(label)?;
        let pointer_key = layout::pointer(label);
        if store.exists(&pointer_key).await? {
            return Err(Error::LabelInUse {
                label: label.to_string(),
            });
        }

        let base = state::read_pointer(&store, from.pointer_name()).await?.edition;
        let editions = EditionStore::new(store.clone());
        let edition = editions.allocate(base).await?;

        let session_state = SessionState {
            edition,
            base,
            source: from,
        };
        let data = serde_json::to_vec(&session_state).expect("state documents serialize infallibly");
        if !store.write_if_absent(&pointer_key, Bytes::from(data)).await? {
            // Lost a race for the label; the allocated edition is left
            // unreferenced and will be reclaimed by the collector.
            return Err(Error::LabelInUse {
                label: label.to_string(),
            });
        }

        tracing::info!(%edition, %base, source = %from, label, "checked out");
        Ok(Session::new(
            store,
            Mode::Editing {
                label: label.to_string(),
                base,
                source: from,
            },
            edition,
        ))
    }

    /// Re-open an existing checkout from its `.{label}.json` record.
    pub async fn resume(store: Store, label: &str) -> Result<Session> {
        path::validate_label(label)?;
        let key = layout::pointer(label);
        let session_state: SessionState = state::read_json(&store, &key)
            .await?
            .ok_or_else(|| Error::not_found(&key))?;
        Ok(Session::new(
            store,
            Mode::Editing {
                label: label.to_string(),
                base: session_state.base,
                source: session_state.source,
            },
            session_state.edition,
        ))
    }

    pub fn with_lock_options(mut self, options: LockOptions) -> Session {
        self.lock_options = options;
        self
    }

    /// Verify object bytes against their digest on every read.
    pub fn with_integrity_checks(mut self, verify: bool) -> Session {
        self.verify_reads = verify;
        self
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn edition(&self) -> EditionId {
        self.edition
    }

    pub fn base(&self) -> Option<EditionId> {
        match &self.mode {
            Mode::Editing { base, .. } => Some(*base),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<Source> {
        match &self.mode {
            Mode::Editing { source, .. } => Some(*source),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match &self.mode {
            Mode::Editing { label, .. } => Some(label),
            _ => None,
        }
    }

    fn require_editing(&self) -> Result<()> {
        match self.mode {
            Mode::Editing { .. } => Ok(()),
            _ => Err(Error::ReadOnlyMode),
        }
    }

    // ---- reads ----

    /// Read `path`, resolving through ancestry. A tombstoned or unknown
    /// path is `not_found`; buffered edits in an open transaction are
    /// visible to their own session.
    pub async fn read(&self, path: &str) -> Result<Bytes> {
        let path = path::validate(path)?;
        if let Some(pending) = self.txn.get(&path) {
            return match pending {
                Pending::Write { data, .. } => Ok(data.clone()),
                Pending::Copy { hash } => self.read_object(hash).await,
                Pending::Delete => Err(Error::not_found(&path)),
            };
        }
        match self.editions.resolve(self.edition, &path).await? {
            Resolution::Exists { hash, .. } => self.read_object(&hash).await,
            Resolution::Deleted { .. } | Resolution::Missing => Err(Error::not_found(&path)),
        }
    }

    async fn read_object(&self, hash: &ContentHash) -> Result<Bytes> {
        let data = self.store.read(&layout::object(hash)).await?;
        if self.verify_reads {
            let actual = ContentHash::digest(&data);
            if actual != *hash {
                return Err(Error::Integrity {
                    expected: *hash,
                    actual,
                });
            }
        }
        Ok(data)
    }

    /// Status of `path`: whether it resolves, where from, and to what.
    pub async fn stat(&self, path: &str) -> Result<Stat> {
        let path = path::validate(path)?;

        if let Some(pending) = self.txn.get(&path) {
            return Ok(match pending {
                Pending::Write { hash, data } => Stat {
                    path,
                    status: PathStatus::Exists,
                    resolved_from: Some(self.edition),
                    hash: Some(*hash),
                    size: Some(data.len() as u64),
                },
                Pending::Copy { hash } => {
                    let size = self.read_object(hash).await?.len() as u64;
                    Stat {
                        path,
                        status: PathStatus::Exists,
                        resolved_from: Some(self.edition),
                        hash: Some(*hash),
                        size: Some(size),
                    }
                }
                Pending::Delete => Stat {
                    path,
                    status: PathStatus::Deleted,
                    resolved_from: Some(self.edition),
                    hash: None,
                    size: None,
                },
            });
        }

        Ok(match self.editions.resolve(self.edition, &path).await? {
            Resolution::Exists { hash, edition } => {
                let size = self.read_object(&hash).await?.len() as u64;
                Stat {
                    path,
                    status: PathStatus::Exists,
                    resolved_from: Some(edition),
                    hash: Some(hash),
                    size: Some(size),
                }
            }
            Resolution::Deleted { edition } => Stat {
                path,
                status: PathStatus::Deleted,
                resolved_from: Some(edition),
                hash: None,
                size: None,
            },
            Resolution::Missing => Stat {
                path,
                status: PathStatus::NotFound,
                resolved_from: None,
                hash: None,
                size: None,
            },
        })
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.status == PathStatus::Exists)
    }

    /// Merged listing of `dir` across the ancestry chain. `""` lists the
    /// root. Subdirectories carry a trailing `/`.
    pub async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let dir = match path::normalize(dir) {
            d if d.is_empty() => d,
            d => path::validate(&d)?,
        };
        self.editions.list_merged(self.edition, &dir).await
    }

    // ---- writes ----

    /// Buffer new bytes for `path`. Outside a transaction the edit is
    /// flushed immediately.
    pub async fn write(&mut self, path: &str, data: impl Into<Bytes>) -> Result<()> {
        self.require_editing()?;
        let path = path::validate(path)?;
        self.txn.record_write(path, data.into());
        self.autocommit().await
    }

    /// Buffer a tombstone for `path`.
    pub async fn delete(&mut self, path: &str) -> Result<()> {
        self.require_editing()?;
        let path = path::validate(path)?;
        self.txn.record_delete(path);
        self.autocommit().await
    }

    /// Record `to` as referencing the object `from` resolves to. No bytes
    /// move; a source that is missing or tombstoned is `not_found`.
    pub async fn copy(&mut self, from: &str, to: &str) -> Result<()> {
        self.require_editing()?;
        let from = path::validate(from)?;
        let to = path::validate(to)?;

        match self.txn.get(&from).cloned() {
            Some(Pending::Write { data, .. }) => {
                // Re-buffer the bytes: aliasing the hash would dangle if the
                // source entry is discarded before flush.
                self.txn.record_write(to, data);
            }
            Some(Pending::Copy { hash }) => self.txn.record_copy(to, hash),
            Some(Pending::Delete) => return Err(Error::not_found(&from)),
            None => match self.editions.resolve(self.edition, &from).await? {
                Resolution::Exists { hash, .. } => self.txn.record_copy(to, hash),
                Resolution::Deleted { .. } | Resolution::Missing => {
                    return Err(Error::not_found(&from));
                }
            },
        }
        self.autocommit().await
    }

    /// Undo a buffered edit, or remove a path file already landed in the
    /// current edition so resolution falls through to ancestry again.
    pub async fn discard(&mut self, path: &str) -> Result<()> {
        self.require_editing()?;
        let path = path::validate(path)?;
        if self.txn.discard(&path) {
            return Ok(());
        }
        self.store
            .delete(&layout::path_file(self.edition, &path))
            .await?;
        Ok(())
    }

    async fn autocommit(&mut self) -> Result<()> {
        if !self.txn.is_open() {
            self.txn.flush(&self.store, self.edition).await?;
        }
        Ok(())
    }

    // ---- transactions ----

    pub fn begin_editing(&mut self) -> Result<()> {
        self.require_editing()?;
        if self.txn.is_open() {
            return Err(Error::AlreadyInTransaction);
        }
        self.txn.begin();
        Ok(())
    }

    /// Flush the open transaction. On failure the session stays in the
    /// transaction with its buffer intact; flushing again is safe.
    pub async fn end_editing(&mut self) -> Result<()> {
        if !self.txn.is_open() {
            return Err(Error::NotInTransaction);
        }
        self.txn.flush(&self.store, self.edition).await
    }

    /// Discard the open transaction without touching storage.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.txn.is_open() {
            return Err(Error::NotInTransaction);
        }
        self.txn.rollback();
        Ok(())
    }

    // ---- shared plumbing for the lock-holding operations ----

    async fn acquire_lock(&self) -> Result<LockHandle> {
        crate::lock::LockManager::new(self.store.clone(), self.lock_options)
            .acquire()
            .await
    }
}

/// Release `lock` after `result`, favoring the operation's outcome: a
/// release failure after success is logged, not surfaced, since the
/// mutation is already durable and the lease will lapse regardless.
async fn finish_locked<T>(lock: LockHandle, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            if let Err(err) = lock.release().await {
                tracing::warn!(error = %err, "lock release failed after a successful operation");
            }
            Ok(value)
        }
        Err(err) => {
            let _ = lock.release().await;
            Err(err)
        }
    }
}
