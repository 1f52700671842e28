//! In-memory backend.
//!
//! The engine test suite runs against this backend. Entries carry a
//! modified timestamp which tests may age artificially, so grace-period
//! behavior is exercised without sleeping.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use crate::{Backend, Error, Result};

#[derive(Clone)]
struct Entry {
    data: Bytes,
    modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift the modified timestamp of `path` back by `age`. Test hook.
    pub fn age_entry(&self, path: &str, age: chrono::Duration) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(path) {
            entry.modified -= age;
        }
    }

    fn not_found(path: &str) -> Error {
        Error::NotFound {
            path: path.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(path)
            .map(|e| e.data.clone())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            path.to_string(),
            Entry {
                data,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn write_if_absent(&self, path: &str, data: Bytes) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(path) {
            return Ok(false);
        }
        entries.insert(
            path.to_string(),
            Entry {
                data,
                modified: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.entries.lock().unwrap().contains_key(path))
    }

    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        let keys: Vec<String> = entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(match delimiter {
            Some(d) => crate::roll_up(keys, prefix, d),
            None => keys,
        })
    }

    async fn atomic_increment(&self, path: &str, initial: u64) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let next = match entries.get(path) {
            Some(entry) => {
                let text = String::from_utf8_lossy(&entry.data);
                let current: u64 = text.trim().parse().map_err(|_| Error::Corrupt {
                    path: path.to_string(),
                    detail: format!("not an integer counter: {text:?}"),
                })?;
                current + 1
            }
            None => initial,
        };
        entries.insert(
            path.to_string(),
            Entry {
                data: Bytes::from(next.to_string()),
                modified: Utc::now(),
            },
        );
        Ok(next)
    }

    async fn modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(path)
            .map(|e| e.modified)
            .ok_or_else(|| Self::not_found(path))
    }
}
