//! Two-phase garbage collection.
//!
//! Phase one computes the live edition set: both published pointers, every
//! pending submission, every working label, each closed over its ancestry.
//! Phase two walks the object space. The `.ref` hint index short-circuits
//! most decisions; when hints are absent or dead the authoritative fallback
//! scan over live editions' path files decides. Hints may be stale — they
//! are never trusted for deletion, only for retention.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use super::{finish_locked, Session};
use crate::edition::EditionId;
use crate::hash::{ContentHash, PathFile};
use crate::lock::LockHandle;
use crate::state::{Pointer, SessionState};
use crate::{layout, state, Result};

#[derive(Debug, Clone, Copy)]
pub struct GcOptions {
    /// Objects younger than this are kept regardless of references, so an
    /// in-flight transaction's uploads cannot be swept before their path
    /// files land.
    pub grace: chrono::Duration,
    /// Compute and count, but delete nothing.
    pub dry_run: bool,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            grace: chrono::Duration::hours(24),
            dry_run: false,
        }
    }
}

/// Outcome counters, one per decision taken.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcReport {
    pub scanned_objects: u64,
    pub deleted_objects: u64,
    pub skipped_by_ref: u64,
    pub skipped_by_scan: u64,
    pub skipped_by_age: u64,
    pub errors: u64,
}

impl Session {
    /// Sweep unreferenced objects older than the grace period. Runs under
    /// the lock with periodic renewal.
    pub async fn collect_garbage(&self, options: GcOptions) -> Result<GcReport> {
        let mut lock = self.acquire_lock().await?;
        let result = self.collect_locked(&mut lock, options).await;
        finish_locked(lock, result).await
    }

    async fn collect_locked(
        &self,
        lock: &mut LockHandle,
        options: GcOptions,
    ) -> Result<GcReport> {
        let mut report = GcReport::default();
        let live = self.live_editions(&mut report).await?;
        tracing::debug!(live = live.len(), "computed live edition set");

        // Built lazily: most stores resolve every object through ref hints.
        let mut live_hashes: Option<HashSet<ContentHash>> = None;
        let cutoff = chrono::Utc::now() - options.grace;

        let keys = self.store.list(layout::OBJECTS_PREFIX, None).await?;
        for key in keys.iter().filter(|key| key.ends_with(".dat")) {
            lock.renew_if_due().await?;
            report.scanned_objects += 1;

            let Some(hash) = layout::object_key_hash(key) else {
                tracing::warn!(%key, "unparseable object key");
                report.errors += 1;
                continue;
            };

            match self.ref_ids(&hash).await {
                Ok(ids) if ids.iter().any(|id| live.contains(id)) => {
                    report.skipped_by_ref += 1;
                    continue;
                }
                Ok(_) => (),
                Err(err) => {
                    tracing::warn!(%hash, error = %err, "failed to read ref index");
                    report.errors += 1;
                    continue;
                }
            }

            let hashes = match &mut live_hashes {
                Some(hashes) => hashes,
                slot => slot.insert(self.live_hash_set(&live, lock).await?),
            };
            if hashes.contains(&hash) {
                report.skipped_by_scan += 1;
                continue;
            }

            match self.store.modified(key).await {
                Ok(modified) if modified > cutoff => {
                    report.skipped_by_age += 1;
                    continue;
                }
                Ok(_) => (),
                Err(err) => {
                    tracing::warn!(%hash, error = %err, "failed to read object mtime");
                    report.errors += 1;
                    continue;
                }
            }

            if !options.dry_run {
                self.store.delete(key).await?;
                self.store.delete(&layout::object_ref(&hash)).await?;
            }
            report.deleted_objects += 1;
        }

        tracing::info!(
            scanned = report.scanned_objects,
            deleted = report.deleted_objects,
            dry_run = options.dry_run,
            "collection pass complete"
        );
        Ok(report)
    }

    /// Every edition reachable from a pointer, pending record, or working
    /// label, closed over ancestry.
    async fn live_editions(&self, report: &mut GcReport) -> Result<BTreeSet<EditionId>> {
        let mut seeds: Vec<EditionId> = Vec::new();

        for name in [layout::PRODUCTION, layout::STAGING] {
            if let Some(pointer) =
                state::read_json::<Pointer>(&self.store, &layout::pointer(name)).await?
            {
                seeds.push(pointer.edition);
            }
        }

        // Pending ids come from the filename, so a corrupt body still pins
        // its edition.
        for key in self.store.list(layout::PENDING_PREFIX, None).await? {
            let name = &key[layout::PENDING_PREFIX.len()..];
            match name.strip_suffix(".json").and_then(|stem| stem.parse().ok()) {
                Some(id) => seeds.push(id),
                None => {
                    tracing::warn!(%key, "unrecognized pending record");
                    report.errors += 1;
                }
            }
        }

        for key in self.store.list(layout::CONTENTS_PREFIX, Some('/')).await? {
            let name = &key[layout::CONTENTS_PREFIX.len()..];
            if !name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            if name == ".production.json" || name == ".staging.json" {
                continue;
            }
            match state::read_json::<SessionState>(&self.store, &key).await {
                Ok(Some(session_state)) => seeds.push(session_state.edition),
                Ok(None) => (),
                Err(err) => {
                    tracing::warn!(%key, error = %err, "unreadable working label");
                    report.errors += 1;
                }
            }
        }

        let mut live = BTreeSet::new();
        for seed in seeds {
            if live.contains(&seed) {
                continue;
            }
            live.extend(self.editions.ancestors(seed).await?);
        }
        Ok(live)
    }

    async fn live_hash_set(
        &self,
        live: &BTreeSet<EditionId>,
        lock: &mut LockHandle,
    ) -> Result<HashSet<ContentHash>> {
        let mut hashes = HashSet::new();
        for id in live {
            lock.renew_if_due().await?;
            for (_, entry) in self.editions.path_files(*id).await? {
                if let PathFile::Hash(hash) = entry {
                    hashes.insert(hash);
                }
            }
        }
        tracing::debug!(hashes = hashes.len(), "built fallback reference set");
        Ok(hashes)
    }

    /// Edition ids recorded in an object's ref index; empty when absent.
    async fn ref_ids(&self, hash: &ContentHash) -> Result<Vec<EditionId>> {
        let key = layout::object_ref(hash);
        let data = match self.store.read(&key).await {
            Ok(data) => data,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(String::from_utf8_lossy(&data)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }
}
