//! The publishing state machine: submit → stage → deploy, with reject and
//! manual staging-pointer moves. Every transition that mutates a published
//! pointer runs under the lock; content lands before any pointer moves.

use bytes::Bytes;
use chrono::Utc;

use super::{finish_locked, Mode, Session};
use crate::edition::EditionId;
use crate::hash::{ContentHash, PathFile};
use crate::lock::LockHandle;
use crate::state::{PendingSubmission, Pointer, RejectionRecord};
use crate::{layout, state, Error, Result};

impl Session {
    /// Submit the working edition for review. Any open transaction is
    /// flushed first; the working label is retired and the session moves to
    /// `Submitted`.
    pub async fn submit(&mut self, message: &str) -> Result<EditionId> {
        let Mode::Editing {
            label,
            base,
            source,
        } = self.mode.clone()
        else {
            return Err(Error::NotInEditingMode);
        };

        if self.txn.is_open() {
            self.txn.flush(&self.store, self.edition).await?;
        }

        let pending = PendingSubmission {
            edition: self.edition,
            base,
            source,
            label: label.clone(),
            message: message.to_string(),
            submitted_at: Utc::now(),
        };
        state::write_json(&self.store, &layout::pending(self.edition), &pending).await?;
        self.store.delete(&layout::pointer(&label)).await?;
        self.mode = Mode::Submitted;

        tracing::info!(edition = %self.edition, %label, "submitted for review");
        Ok(self.edition)
    }

    /// Withdraw a pending submission, leaving a rejection record. No lock:
    /// pending records are only ever consumed once.
    pub async fn reject(&self, id: EditionId, reason: &str) -> Result<()> {
        let pending = self.read_pending(id).await?;
        let record = RejectionRecord {
            edition: id,
            reason: reason.to_string(),
            rejected_at: Utc::now(),
        };
        state::write_json(&self.store, &layout::rejected(id), &record).await?;
        self.store.delete(&layout::pending(id)).await?;
        tracing::info!(%id, label = %pending.label, reason, "rejected submission");
        Ok(())
    }

    /// Stage a pending edition: verify its base still matches the pointer
    /// it branched from, fold the edition into the object ref index, then
    /// move the staging pointer and consume the pending record.
    pub async fn stage(&self, id: EditionId) -> Result<()> {
        let mut lock = self.acquire_lock().await?;
        let result = self.stage_locked(&mut lock, id).await;
        finish_locked(lock, result).await
    }

    async fn stage_locked(&self, lock: &mut LockHandle, id: EditionId) -> Result<()> {
        let pending = self.read_pending(id).await?;

        let current = state::read_pointer(&self.store, pending.source.pointer_name()).await?;
        if pending.base != current.edition {
            return Err(Error::ConflictDetected {
                base: pending.base,
                current: current.edition,
                source: pending.source,
            });
        }

        // Fold every referenced object into the ref index before the
        // pointer moves; a crash mid-walk leaves hints that are merely
        // stale, which the collector tolerates.
        let files = self.editions.path_files(id).await?;
        let mut refs = 0usize;
        for (_, entry) in &files {
            lock.renew_if_due().await?;
            if let PathFile::Hash(hash) = entry {
                self.append_ref(hash, id).await?;
                refs += 1;
            }
        }

        state::write_json(
            &self.store,
            &layout::pointer(layout::STAGING),
            &Pointer { edition: id },
        )
        .await?;
        self.store.delete(&layout::pending(id)).await?;

        tracing::info!(%id, base = %pending.base, source = %pending.source, refs, "staged edition");
        Ok(())
    }

    /// Copy the staging pointer to production, byte for byte.
    pub async fn deploy(&self) -> Result<()> {
        let lock = self.acquire_lock().await?;
        let result = self.deploy_locked().await;
        finish_locked(lock, result).await
    }

    async fn deploy_locked(&self) -> Result<()> {
        let staging = self
            .store
            .read(&layout::pointer(layout::STAGING))
            .await
            .map_err(Error::from)?;
        self.store
            .write(&layout::pointer(layout::PRODUCTION), staging)
            .await?;
        tracing::info!("deployed staging to production");
        Ok(())
    }

    /// Point staging at an arbitrary existing edition, e.g. to roll back.
    /// The ref index is not touched.
    pub async fn set_staging_pointer(&self, id: EditionId) -> Result<()> {
        let lock = self.acquire_lock().await?;
        let result = self.set_staging_locked(id).await;
        finish_locked(lock, result).await
    }

    async fn set_staging_locked(&self, id: EditionId) -> Result<()> {
        if !self.editions.exists(id).await? {
            return Err(Error::not_found(&layout::edition_prefix(id)));
        }
        state::write_json(
            &self.store,
            &layout::pointer(layout::STAGING),
            &Pointer { edition: id },
        )
        .await?;
        tracing::info!(%id, "moved staging pointer");
        Ok(())
    }

    async fn read_pending(&self, id: EditionId) -> Result<PendingSubmission> {
        let key = layout::pending(id);
        let data = match self.store.read(&key).await {
            Ok(data) => data,
            Err(err) if err.is_not_found() => {
                return Err(Error::PendingNotFound { edition: id });
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&data).map_err(|err| Error::PendingCorrupt {
            edition: id,
            reason: err.to_string(),
        })
    }

    /// Append `id` to the ref index of `hash`, skipping duplicates. The
    /// whole file is rewritten; callers hold the lock.
    async fn append_ref(&self, hash: &ContentHash, id: EditionId) -> Result<()> {
        let key = layout::object_ref(hash);
        let line = id.to_string();
        let mut content = match self.store.read(&key).await {
            Ok(data) => String::from_utf8_lossy(&data).into_owned(),
            Err(err) if err.is_not_found() => String::new(),
            Err(err) => return Err(err.into()),
        };
        if content.lines().any(|existing| existing.trim() == line) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&line);
        content.push('\n');
        self.store.write(&key, Bytes::from(content)).await?;
        Ok(())
    }
}
