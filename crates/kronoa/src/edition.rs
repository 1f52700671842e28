//! Editions: immutable numbered snapshots linked through `.origin` parent
//! pointers, resolved root-ward until a `.flattened` terminus.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use storage::Store;

use crate::hash::{ContentHash, PathFile};
use crate::{layout, state, Error, Result};

/// Monotonically increasing edition number. Never reused.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditionId(u64);

impl EditionId {
    /// The bootstrap edition: empty, flattened, initially pointed at by both
    /// `production` and `staging`.
    pub const GENESIS: EditionId = EditionId(10_000);

    pub const fn new(id: u64) -> EditionId {
        EditionId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EditionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for EditionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::str::FromStr for EditionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(EditionId(s.trim().parse()?))
    }
}

/// Outcome of resolving a path through an edition's ancestry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A path file naming this hash was found in `edition`.
    Exists {
        hash: ContentHash,
        edition: EditionId,
    },
    /// A tombstone was found in `edition`; nearer editions win, so the path
    /// is gone even if an older ancestor still holds bytes.
    Deleted { edition: EditionId },
    /// No edition in the chain mentions the path.
    Missing,
}

/// Initialize an empty store: seed `editions/.head`, create the flattened
/// genesis edition, and point `production` and `staging` at it. Idempotent;
/// a store that is already bootstrapped is left untouched.
pub async fn bootstrap(store: &Store) -> Result<EditionId> {
    let seeded = store
        .write_if_absent(layout::HEAD, Bytes::from(EditionId::GENESIS.to_string()))
        .await?;
    // Every step is write-if-absent so an interrupted bootstrap repairs
    // itself on the next call.
    store
        .write_if_absent(&layout::flattened(EditionId::GENESIS), Bytes::new())
        .await?;
    let pointer = serde_json::to_vec(&state::Pointer {
        edition: EditionId::GENESIS,
    })
    .expect("pointer documents serialize infallibly");
    for name in [layout::PRODUCTION, layout::STAGING] {
        store
            .write_if_absent(&layout::pointer(name), Bytes::from(pointer.clone()))
            .await?;
    }
    if seeded {
        tracing::info!(genesis = %EditionId::GENESIS, "bootstrapped content store");
    }
    Ok(EditionId::GENESIS)
}

#[derive(Clone)]
pub struct EditionStore {
    store: Store,
}

impl EditionStore {
    pub fn new(store: Store) -> EditionStore {
        EditionStore { store }
    }

    /// Allocate the next edition id and record its parent.
    pub async fn allocate(&self, base: EditionId) -> Result<EditionId> {
        let id = EditionId(
            self.store
                .atomic_increment(layout::HEAD, EditionId::GENESIS.get())
                .await?,
        );
        self.store
            .write(&layout::origin(id), Bytes::from(base.to_string()))
            .await?;
        tracing::debug!(%id, %base, "allocated edition");
        Ok(id)
    }

    /// An edition exists once it carries an `.origin` or `.flattened` marker.
    pub async fn exists(&self, id: EditionId) -> Result<bool> {
        Ok(self.store.exists(&layout::origin(id)).await?
            || self.store.exists(&layout::flattened(id)).await?)
    }

    /// Parent edition, or `None` at a chain root.
    pub async fn origin(&self, id: EditionId) -> Result<Option<EditionId>> {
        let key = layout::origin(id);
        let data = match self.store.read(&key).await {
            Ok(data) => data,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let parent: EditionId = String::from_utf8_lossy(&data).parse().map_err(|_| {
            Error::Storage(storage::Error::Corrupt {
                path: key,
                detail: "origin is not an integer edition id".to_string(),
            })
        })?;
        // Ids are strictly increasing, so a parent at or above its child
        // would make the chain cyclic.
        if parent >= id {
            return Err(Error::Storage(storage::Error::Corrupt {
                path: layout::origin(id),
                detail: format!("origin {parent} is not older than {id}"),
            }));
        }
        Ok(Some(parent))
    }

    pub async fn is_flattened(&self, id: EditionId) -> Result<bool> {
        Ok(self.store.exists(&layout::flattened(id)).await?)
    }

    /// The edition and every ancestor up to (and including) the first
    /// flattened or root edition.
    pub async fn ancestors(&self, id: EditionId) -> Result<Vec<EditionId>> {
        let mut chain = vec![id];
        let mut current = id;
        loop {
            if self.is_flattened(current).await? {
                return Ok(chain);
            }
            match self.origin(current).await? {
                Some(parent) => {
                    chain.push(parent);
                    current = parent;
                }
                None => return Ok(chain),
            }
        }
    }

    /// Read one edition's own path file, without ancestry traversal.
    pub async fn read_path_file(&self, id: EditionId, path: &str) -> Result<Option<PathFile>> {
        let key = layout::path_file(id, path);
        match self.store.read(&key).await {
            Ok(data) => Ok(Some(PathFile::decode(&key, &data)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve `path` starting at `edition` and walking toward the root.
    /// The nearest path file wins; traversal stops at a flattened edition or
    /// a missing `.origin`.
    pub async fn resolve(&self, edition: EditionId, path: &str) -> Result<Resolution> {
        let mut current = edition;
        loop {
            match self.read_path_file(current, path).await? {
                Some(PathFile::Hash(hash)) => {
                    return Ok(Resolution::Exists {
                        hash,
                        edition: current,
                    });
                }
                Some(PathFile::Deleted) => return Ok(Resolution::Deleted { edition: current }),
                None => {
                    if self.is_flattened(current).await? {
                        return Ok(Resolution::Missing);
                    }
                    match self.origin(current).await? {
                        Some(parent) => current = parent,
                        None => return Ok(Resolution::Missing),
                    }
                }
            }
        }
    }

    /// Every path file of a single edition: `(path, payload)` pairs, system
    /// markers excluded, paths relative to the edition root.
    pub async fn path_files(&self, id: EditionId) -> Result<Vec<(String, PathFile)>> {
        let prefix = layout::edition_prefix(id);
        let keys = self.store.list(&prefix, None).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let path = &key[prefix.len()..];
            let leaf = path.rsplit('/').next().unwrap_or(path);
            if leaf.starts_with('.') {
                continue;
            }
            let data = self.store.read(&key).await?;
            out.push((path.to_string(), PathFile::decode(&key, &data)?));
        }
        Ok(out)
    }

    /// Merged listing of one directory level across the ancestry chain.
    ///
    /// Name-first shadowing: the nearest edition mentioning a name decides
    /// it — a hash keeps it, a tombstone hides it, a subdirectory keeps it
    /// as `name/` provided at least one descendant survives the same merge.
    /// `dir` is a validated path, or `""` for the root. Missing directories
    /// yield an empty listing, never an error.
    pub async fn list_merged(&self, edition: EditionId, dir: &str) -> Result<Vec<String>> {
        self.list_merged_boxed(edition, dir.to_string()).await
    }

    fn list_merged_boxed(
        &self,
        edition: EditionId,
        dir: String,
    ) -> BoxFuture<'_, Result<Vec<String>>> {
        async move {
            // name -> decided fate: Some(rendered entry) or None (hidden).
            let mut decided: BTreeMap<String, Option<String>> = BTreeMap::new();

            for level in self.ancestors(edition).await? {
                let prefix = match dir.is_empty() {
                    true => layout::edition_prefix(level),
                    false => format!("{}{dir}/", layout::edition_prefix(level)),
                };
                for child in self.store.list(&prefix, Some('/')).await? {
                    let rest = &child[prefix.len()..];
                    let (name, is_dir) = match rest.strip_suffix('/') {
                        Some(name) => (name, true),
                        None => (rest, false),
                    };
                    if name.starts_with('.') || decided.contains_key(name) {
                        continue;
                    }
                    let fate = if is_dir {
                        let sub = match dir.is_empty() {
                            true => name.to_string(),
                            false => format!("{dir}/{name}"),
                        };
                        // Every descendant may be tombstoned by a nearer
                        // edition; only surviving content earns the entry.
                        match self.list_merged_boxed(edition, sub).await?.is_empty() {
                            true => None,
                            false => Some(format!("{name}/")),
                        }
                    } else {
                        match PathFile::decode(&child, &self.store.read(&child).await?)? {
                            PathFile::Hash(_) => Some(name.to_string()),
                            PathFile::Deleted => None,
                        }
                    };
                    decided.insert(name.to_string(), fate);
                }
            }

            let mut entries: Vec<String> = decided.into_values().flatten().collect();
            entries.sort();
            Ok(entries)
        }
        .boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    async fn seeded() -> (Store, EditionStore) {
        let store: Store = Arc::new(storage::MemoryBackend::new());
        bootstrap(&store).await.unwrap();
        (store.clone(), EditionStore::new(store))
    }

    async fn put(store: &Store, id: EditionId, path: &str, entry: PathFile) {
        store
            .write(&layout::path_file(id, path), Bytes::from(entry.encode()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store: Store = Arc::new(storage::MemoryBackend::new());
        assert_eq!(bootstrap(&store).await.unwrap(), EditionId::GENESIS);
        assert_eq!(bootstrap(&store).await.unwrap(), EditionId::GENESIS);
        assert_eq!(
            store.read(layout::HEAD).await.unwrap().as_ref(),
            b"10000",
        );
        assert!(store.exists("editions/10000/.flattened").await.unwrap());
    }

    #[tokio::test]
    async fn allocation_is_monotonic_and_parented() {
        let (store, editions) = seeded().await;
        let a = editions.allocate(EditionId::GENESIS).await.unwrap();
        let b = editions.allocate(a).await.unwrap();
        assert_eq!(a, EditionId::new(10001));
        assert_eq!(b, EditionId::new(10002));
        assert_eq!(editions.origin(b).await.unwrap(), Some(a));
        assert_eq!(
            store.read("editions/10002/.origin").await.unwrap().as_ref(),
            b"10001",
        );
    }

    #[tokio::test]
    async fn resolve_walks_ancestry_and_stops_at_flattened() {
        let (store, editions) = seeded().await;
        let a = editions.allocate(EditionId::GENESIS).await.unwrap();
        let b = editions.allocate(a).await.unwrap();

        let hash = ContentHash::digest(b"v1");
        put(&store, a, "x", PathFile::Hash(hash)).await;

        assert_eq!(
            editions.resolve(b, "x").await.unwrap(),
            Resolution::Exists { hash, edition: a },
        );
        // Genesis is flattened, so an unknown path terminates there.
        assert_eq!(editions.resolve(b, "y").await.unwrap(), Resolution::Missing);

        put(&store, b, "x", PathFile::Deleted).await;
        assert_eq!(
            editions.resolve(b, "x").await.unwrap(),
            Resolution::Deleted { edition: b },
        );
    }

    #[tokio::test]
    async fn merged_listing_shadows_by_name() {
        let (store, editions) = seeded().await;
        let a = editions.allocate(EditionId::GENESIS).await.unwrap();
        let b = editions.allocate(a).await.unwrap();

        let h = ContentHash::digest(b".");
        put(&store, a, "docs/keep.md", PathFile::Hash(h)).await;
        put(&store, a, "docs/gone.md", PathFile::Hash(h)).await;
        put(&store, a, "top.md", PathFile::Hash(h)).await;
        put(&store, b, "docs/gone.md", PathFile::Deleted).await;
        put(&store, b, "docs/new.md", PathFile::Hash(h)).await;

        assert_eq!(
            editions.list_merged(b, "").await.unwrap(),
            vec!["docs/", "top.md"],
        );
        assert_eq!(
            editions.list_merged(b, "docs").await.unwrap(),
            vec!["keep.md", "new.md"],
        );
        assert_eq!(
            editions.list_merged(b, "missing").await.unwrap(),
            Vec::<String>::new(),
        );
    }

    #[tokio::test]
    async fn fully_tombstoned_subdirectory_is_hidden() {
        let (store, editions) = seeded().await;
        let a = editions.allocate(EditionId::GENESIS).await.unwrap();
        let b = editions.allocate(a).await.unwrap();

        let h = ContentHash::digest(b".");
        put(&store, a, "sub/only.md", PathFile::Hash(h)).await;
        put(&store, b, "sub/only.md", PathFile::Deleted).await;

        assert_eq!(
            editions.list_merged(b, "").await.unwrap(),
            Vec::<String>::new(),
        );
        // The older edition still lists its own content.
        assert_eq!(editions.list_merged(a, "").await.unwrap(), vec!["sub/"]);
    }
}
