//! Lease-based mutual exclusion over the storage contract.
//!
//! A lock is a JSON record at `contents/.lock` created with write-if-absent.
//! Acquisition polls with bounded exponential backoff inside the caller's
//! timeout, taking over leases whose expiry has passed. Renewal and release
//! verify ownership first; a handle that is merely dropped leaves its lease
//! to expire on its own rather than silently releasing.

use bytes::Bytes;
use chrono::Utc;
use exponential_backoff::Backoff;
use std::time::Duration;
use storage::Store;
use tokio::time::Instant;

use crate::state::LockRecord;
use crate::{layout, state, Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long acquisition may poll before `lock_timeout`.
    pub timeout: Duration,
    /// Lease duration stamped into the lock record. Long-running holders
    /// must renew well inside this window.
    pub lease: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            lease: Duration::from_secs(30),
        }
    }
}

pub struct LockManager {
    store: Store,
    options: LockOptions,
}

impl LockManager {
    pub fn new(store: Store, options: LockOptions) -> LockManager {
        LockManager { store, options }
    }

    /// Acquire the store-wide lock, polling until `options.timeout`.
    pub async fn acquire(&self) -> Result<LockHandle> {
        let owner = uuid::Uuid::new_v4().simple().to_string();
        let deadline = Instant::now() + self.options.timeout;
        let backoff = Backoff::new(u32::MAX, Duration::from_millis(50), Some(Duration::from_secs(2)));

        let mut attempt = 0u32;
        loop {
            let now = Utc::now();
            let record = LockRecord {
                owner: owner.clone(),
                acquired_at: now,
                expires_at: now
                    + chrono::Duration::from_std(self.options.lease)
                        .expect("lease duration is in range"),
            };
            let data = serde_json::to_vec(&record).expect("lock records serialize infallibly");
            if self
                .store
                .write_if_absent(layout::LOCK, Bytes::from(data))
                .await?
            {
                tracing::debug!(%owner, expires_at = %record.expires_at, "acquired lock");
                return Ok(LockHandle {
                    store: self.store.clone(),
                    owner,
                    lease: self.options.lease,
                    record,
                    renewed: Instant::now(),
                    released: false,
                });
            }

            // Somebody holds it. A holder whose lease has lapsed (or whose
            // record no longer parses) is fair game for takeover.
            match state::read_json::<LockRecord>(&self.store, layout::LOCK).await {
                Ok(Some(held)) if held.expires_at >= now => (),
                Ok(Some(held)) => {
                    tracing::warn!(holder = %held.owner, expired = %held.expires_at, "removing stale lock");
                    self.store.delete(layout::LOCK).await?;
                    continue;
                }
                Ok(None) => continue,
                Err(_) => {
                    tracing::warn!("removing unparseable lock record");
                    self.store.delete(layout::LOCK).await?;
                    continue;
                }
            }

            attempt += 1;
            let delay = backoff.next(attempt).unwrap_or(Duration::from_secs(2));
            if Instant::now() + delay >= deadline {
                return Err(Error::LockTimeout);
            }
            tokio::time::sleep(delay).await;
        }
    }
}

/// A held lease. Callers renew explicitly at safe points; there is no
/// background heartbeat.
pub struct LockHandle {
    store: Store,
    owner: String,
    lease: Duration,
    record: LockRecord,
    renewed: Instant,
    released: bool,
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("owner", &self.owner)
            .field("lease", &self.lease)
            .field("record", &self.record)
            .field("renewed", &self.renewed)
            .field("released", &self.released)
            .finish()
    }
}

impl LockHandle {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn expires_at(&self) -> chrono::DateTime<Utc> {
        self.record.expires_at
    }

    /// Re-read the lock, verify we still own it, and extend the lease.
    /// Ownership lost for any reason surfaces `lock_expired`.
    pub async fn renew(&mut self) -> Result<()> {
        let held = state::read_json::<LockRecord>(&self.store, layout::LOCK)
            .await
            .map_err(|_| Error::LockExpired)?
            .ok_or(Error::LockExpired)?;
        if held.owner != self.owner {
            return Err(Error::LockExpired);
        }
        self.record.expires_at = Utc::now()
            + chrono::Duration::from_std(self.lease).expect("lease duration is in range");
        let data = serde_json::to_vec(&self.record).expect("lock records serialize infallibly");
        self.store.write(layout::LOCK, Bytes::from(data)).await?;
        self.renewed = Instant::now();
        tracing::trace!(owner = %self.owner, expires_at = %self.record.expires_at, "renewed lease");
        Ok(())
    }

    /// Renew once a third of the lease has elapsed since the last renewal.
    /// Cheap enough to call from every iteration of a long scan.
    pub async fn renew_if_due(&mut self) -> Result<()> {
        if self.renewed.elapsed() >= self.lease / 3 {
            self.renew().await?;
        }
        Ok(())
    }

    /// Verify ownership and delete the lock record.
    pub async fn release(mut self) -> Result<()> {
        let held = state::read_json::<LockRecord>(&self.store, layout::LOCK)
            .await
            .map_err(|_| Error::LockExpired)?
            .ok_or(Error::LockExpired)?;
        if held.owner != self.owner {
            return Err(Error::LockExpired);
        }
        self.store.delete(layout::LOCK).await?;
        self.released = true;
        tracing::debug!(owner = %self.owner, "released lock");
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            // The lease expires on its own; deleting here without owner
            // verification could release somebody else's lock.
            tracing::debug!(owner = %self.owner, "lock handle dropped without release");
        }
    }
}
