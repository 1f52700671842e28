//! Local-filesystem backend for development and tests.
//!
//! Keys map directly onto paths below a root directory. Writes land in a
//! hidden staging directory and are renamed into place, so a concurrent
//! reader of a pointer file never observes a torn write. `atomic_increment`
//! is serialized with an in-process mutex: this backend targets a single
//! development process, not a shared filesystem.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::{Backend, Error, Result};

const STAGING_DIR: &str = ".kronoa-tmp";

pub struct FilesystemBackend {
    root: PathBuf,
    counter_mu: tokio::sync::Mutex<()>,
}

impl FilesystemBackend {
    /// Open a backend rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self {
            root,
            counter_mu: tokio::sync::Mutex::new(()),
        })
    }

    fn abs(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Write via the staging directory and rename into place.
    async fn write_atomic(&self, key: &str, data: &[u8]) -> Result<()> {
        let dst = self.abs(key);
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self
            .root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().simple().to_string());
        {
            let mut f = tokio::fs::File::create(&tmp).await?;
            f.write_all(data).await?;
            f.flush().await?;
        }
        tokio::fs::rename(&tmp, &dst).await?;
        Ok(())
    }

    fn not_found(key: &str) -> Error {
        Error::NotFound {
            path: key.to_string(),
        }
    }

    /// Collect every key under `dir`, depth-first, into `out`.
    async fn walk(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    if path.file_name().map(|n| n == STAGING_DIR) != Some(true) {
                        stack.push(path);
                    }
                } else {
                    let rel = path
                        .strip_prefix(&self.root)
                        .expect("walked path is under root");
                    // Keys are `/`-separated regardless of host platform.
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Backend for FilesystemBackend {
    async fn read(&self, path: &str) -> Result<Bytes> {
        match tokio::fs::read(self.abs(path)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Self::not_found(path)),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        self.write_atomic(path, &data).await
    }

    async fn write_if_absent(&self, path: &str, data: Bytes) -> Result<bool> {
        let dst = self.abs(path);
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut f = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dst)
            .await
        {
            Ok(f) => f,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        f.write_all(&data).await?;
        f.flush().await?;
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.abs(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.abs(path)).await?)
    }

    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Vec<String>> {
        // Walk from the deepest directory implied by the prefix, then filter.
        let dir = match prefix.rfind('/') {
            Some(ix) => self.root.join(&prefix[..ix]),
            None => self.root.clone(),
        };
        let mut keys = Vec::new();
        self.walk(&dir, &mut keys).await?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(match delimiter {
            Some(d) => crate::roll_up(keys, prefix, d),
            None => keys,
        })
    }

    async fn atomic_increment(&self, path: &str, initial: u64) -> Result<u64> {
        let _guard = self.counter_mu.lock().await;
        let next = match tokio::fs::read(self.abs(path)).await {
            Ok(data) => {
                let text = String::from_utf8_lossy(&data);
                let current: u64 =
                    text.trim()
                        .parse()
                        .map_err(|_| Error::Corrupt {
                            path: path.to_string(),
                            detail: format!("not an integer counter: {text:?}"),
                        })?;
                current + 1
            }
            Err(err) if err.kind() == ErrorKind::NotFound => initial,
            Err(err) => return Err(err.into()),
        };
        self.write_atomic(path, next.to_string().as_bytes()).await?;
        Ok(next)
    }

    async fn modified(&self, path: &str) -> Result<DateTime<Utc>> {
        match tokio::fs::metadata(self.abs(path)).await {
            Ok(meta) => Ok(meta.modified()?.into()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Self::not_found(path)),
            Err(err) => Err(err.into()),
        }
    }
}
