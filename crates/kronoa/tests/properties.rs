//! Generative checks of the engine's core invariants: ancestry resolution
//! against a reference model, merged-listing semantics, and the
//! content-address integrity of every object the engine writes.

use bytes::Bytes;
use quickcheck::quickcheck;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kronoa::{bootstrap, layout, ContentHash, Error, PathStatus, Session, Source};
use storage::{MemoryBackend, Store};

const PATHS: &[&str] = &["a.md", "b.md", "docs/c.md", "docs/d.md", "deep/e/f.md"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum ModelState {
    Absent,
    Deleted,
    Present(u8),
}

quickcheck! {
    /// Random write/delete batches land in up to three successive staged
    /// editions; resolution, stat, and the merged root listing must then
    /// agree with a plain map replaying the same operations in order.
    fn resolution_matches_reference_model(ops: Vec<(u8, Option<u8>)>) -> bool {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(check_against_model(ops))
    }

    /// Path normalization is idempotent, and a validated path re-validates
    /// to itself.
    fn normalization_is_idempotent(input: String) -> bool {
        let once = kronoa::path::normalize(&input);
        let twice = kronoa::path::normalize(&once);
        if once != twice {
            return false;
        }
        match kronoa::path::validate(&input) {
            Ok(valid) => kronoa::path::validate(&valid).ok() == Some(valid),
            Err(_) => true,
        }
    }
}

async fn check_against_model(ops: Vec<(u8, Option<u8>)>) -> bool {
    let store: Store = Arc::new(MemoryBackend::new());
    bootstrap(&store).await.unwrap();

    let mut model: BTreeMap<&str, ModelState> =
        PATHS.iter().map(|p| (*p, ModelState::Absent)).collect();

    // At most three generations, each checked out, edited, submitted, and
    // staged before the next begins.
    for (generation, chunk) in ops.chunks(ops.len() / 3 + 1).enumerate() {
        let label = format!("gen{generation}");
        let mut session = Session::checkout(store.clone(), &label, Source::Staging)
            .await
            .unwrap();
        for (path_ix, content) in chunk {
            let path = PATHS[*path_ix as usize % PATHS.len()];
            match content {
                Some(byte) => {
                    session.write(path, Bytes::from(vec![*byte])).await.unwrap();
                    model.insert(path, ModelState::Present(*byte));
                }
                None => {
                    session.delete(path).await.unwrap();
                    model.insert(path, ModelState::Deleted);
                }
            }
        }
        let edition = session.submit("generation").await.unwrap();
        let admin = Session::staging(store.clone()).await.unwrap();
        admin.stage(edition).await.unwrap();
    }

    let reader = Session::staging(store.clone()).await.unwrap();

    // Reads and stats agree with the model.
    for (path, state) in &model {
        let stat = reader.stat(path).await.unwrap();
        match state {
            ModelState::Present(byte) => {
                assert_eq!(stat.status, PathStatus::Exists, "{path}");
                assert_eq!(reader.read(path).await.unwrap().as_ref(), &[*byte]);
            }
            ModelState::Deleted => {
                assert_eq!(stat.status, PathStatus::Deleted, "{path}");
                assert!(matches!(
                    reader.read(path).await.unwrap_err(),
                    Error::NotFound { .. }
                ));
            }
            ModelState::Absent => {
                assert_eq!(stat.status, PathStatus::NotFound, "{path}");
                assert!(matches!(
                    reader.read(path).await.unwrap_err(),
                    Error::NotFound { .. }
                ));
            }
        }
    }

    // The merged root listing names exactly the surviving entries, with
    // directories collapsed and tombstones hidden.
    let mut expected: BTreeSet<String> = BTreeSet::new();
    for (path, state) in &model {
        if let ModelState::Present(_) = state {
            match path.split_once('/') {
                Some((dir, _)) => expected.insert(format!("{dir}/")),
                None => expected.insert(path.to_string()),
            };
        }
    }
    let listed = reader.list("").await.unwrap();
    assert_eq!(listed, expected.into_iter().collect::<Vec<_>>());

    // Every object the engine wrote hashes to its own key.
    for key in store.list(layout::OBJECTS_PREFIX, None).await.unwrap() {
        if !key.ends_with(".dat") {
            continue;
        }
        let expected = layout::object_key_hash(&key).unwrap();
        let actual = ContentHash::digest(&store.read(&key).await.unwrap());
        assert_eq!(expected, actual, "{key}");
    }

    true
}

/// A session reads its own buffered writes before they are flushed.
#[tokio::test]
async fn writes_are_visible_inside_an_open_transaction() {
    let store: Store = Arc::new(MemoryBackend::new());
    bootstrap(&store).await.unwrap();

    let mut session = Session::checkout(store.clone(), "draft", Source::Staging)
        .await
        .unwrap();
    session.begin_editing().unwrap();
    session
        .write("articles/a.md", Bytes::from_static(b"buffered"))
        .await
        .unwrap();

    assert_eq!(
        session.read("articles/a.md").await.unwrap().as_ref(),
        b"buffered",
    );
    let stat = session.stat("articles/a.md").await.unwrap();
    assert_eq!(stat.status, PathStatus::Exists);
    assert_eq!(stat.resolved_from, Some(session.edition()));
    assert_eq!(stat.size, Some(8));

    // Nothing has landed in storage yet.
    assert!(!store
        .exists(&layout::path_file(session.edition(), "articles/a.md"))
        .await
        .unwrap());

    session.end_editing().await.unwrap();
    assert_eq!(
        session.read("articles/a.md").await.unwrap().as_ref(),
        b"buffered",
    );
    assert!(store
        .exists(&layout::path_file(session.edition(), "articles/a.md"))
        .await
        .unwrap());
}

/// Lock leases exclude one another: while any task holds the lock, no other
/// acquirer succeeds, so the critical sections never overlap.
#[tokio::test]
async fn lock_holders_are_mutually_exclusive() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let store: Store = Arc::new(MemoryBackend::new());
    let busy = Arc::new(AtomicBool::new(false));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let busy = busy.clone();
        tasks.push(tokio::spawn(async move {
            let manager = kronoa::LockManager::new(
                store,
                kronoa::LockOptions {
                    timeout: std::time::Duration::from_secs(10),
                    lease: std::time::Duration::from_secs(60),
                },
            );
            let lock = manager.acquire().await.unwrap();
            assert!(!busy.swap(true, Ordering::SeqCst), "lock overlap");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            busy.store(false, Ordering::SeqCst);
            lock.release().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}
